/// A path in the storage tree, split into its parent directories and the
/// leaf file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePath<'a> {
    normalized: &'a str,
    parents: Vec<&'a str>,
    file_name: &'a str,
}

impl<'a> StoragePath<'a> {
    /// Strips leading separators and drops empty and `.` segments. Returns
    /// `None` when nothing names a file.
    pub fn parse(path: &'a str) -> Option<Self> {
        let normalized = path.trim_start_matches('/');
        let mut segments: Vec<&str> = normalized
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();
        let file_name = segments.pop()?;
        Some(Self {
            normalized,
            parents: segments,
            file_name,
        })
    }

    /// The path with its leading separators removed, as stored with a descriptor.
    pub fn normalized(&self) -> &'a str {
        self.normalized
    }

    pub fn parents(&self) -> &[&'a str] {
        &self.parents
    }

    pub fn file_name(&self) -> &'a str {
        self.file_name
    }
}
