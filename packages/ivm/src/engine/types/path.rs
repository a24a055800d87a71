use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// Dot-separated attribute path (`author.name`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Path(pub Vec<SmolStr>);

impl Path {
    pub fn new(s: &str) -> Self {
        if s.is_empty() {
            Path(vec![])
        } else {
            Path(s.split('.').map(SmolStr::new).collect())
        }
    }

    pub fn as_str(&self) -> String {
        self.0
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[SmolStr] {
        &self.0
    }

    pub fn first(&self) -> Option<&SmolStr> {
        self.0.first()
    }

    /// Path without its first segment.
    pub fn tail(&self) -> Path {
        Path(self.0.iter().skip(1).cloned().collect())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Path::new(s)
    }
}

impl Serialize for Path {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.as_str())
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Ok(Path::new(&s))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_path_new_empty() {
        let path = Path::new("");
        assert_eq!(path, Path(vec![]));
        assert!(path.is_empty());
    }

    #[test]
    fn test_path_new_nested() {
        let path = Path::new("a.b.c");
        let res: Vec<SmolStr> = vec!["a", "b", "c"].into_iter().map(SmolStr::new).collect();
        assert_eq!(path, Path(res));
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn test_path_tail() {
        let path = Path::new("author.profile.name");
        assert_eq!(path.first().map(|s| s.as_str()), Some("author"));
        assert_eq!(path.tail().as_str(), "profile.name");
        assert!(Path::new("id").tail().is_empty());
    }

    #[test]
    fn test_path_serialize_deserialize() {
        let path = Path::new("payload.record.id");
        let json_str = serde_json::to_string(&path).unwrap();
        assert_eq!(json_str, "\"payload.record.id\"");

        let restored: Path = serde_json::from_str(&json_str).unwrap();
        assert_eq!(restored.segments().len(), 3);
        assert_eq!(restored.0[0], "payload");
        assert_eq!(restored.0[2], "id");
    }
}
