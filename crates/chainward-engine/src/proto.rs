//! Generated ext_proc wire types (see `proto/ext_proc.proto`).

#![allow(clippy::all)]

tonic::include_proto!("envoy.service.ext_proc.v3");
