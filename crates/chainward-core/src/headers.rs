//! Header primitives.
//!
//! Names are stored lowercase so lookups are case-insensitive and merge
//! keys line up with what the proxy sends (HTTP/2 lowercases everything).

/// Ordered multi-map of HTTP headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Overwrite-or-add: drops every existing value for `name`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        self.entries.retain(|(k, _)| *k != name);
        self.entries.push((name, value.into()));
    }

    /// Append-or-add: keeps existing values.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((name.to_ascii_lowercase(), value.into()));
    }

    /// Remove every value for `name`. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before != self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k.as_ref(), v);
        }
        headers
    }
}

/// One header operation requested by a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderOp {
    /// Overwrite-or-add.
    Set { name: String, value: String },
    /// Append-or-add.
    Append { name: String, value: String },
    Remove { name: String },
}

impl HeaderOp {
    pub fn set(name: &str, value: impl Into<String>) -> Self {
        HeaderOp::Set {
            name: name.to_ascii_lowercase(),
            value: value.into(),
        }
    }

    pub fn append(name: &str, value: impl Into<String>) -> Self {
        HeaderOp::Append {
            name: name.to_ascii_lowercase(),
            value: value.into(),
        }
    }

    pub fn remove(name: &str) -> Self {
        HeaderOp::Remove {
            name: name.to_ascii_lowercase(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            HeaderOp::Set { name, .. } | HeaderOp::Append { name, .. } | HeaderOp::Remove { name } => {
                name
            }
        }
    }

    /// Apply to a header map the same way the proxy applies the mutation.
    pub fn apply(&self, headers: &mut Headers) {
        match self {
            HeaderOp::Set { name, value } => headers.set(name, value.clone()),
            HeaderOp::Append { name, value } => headers.append(name, value.clone()),
            HeaderOp::Remove { name } => {
                headers.remove(name);
            }
        }
    }
}
