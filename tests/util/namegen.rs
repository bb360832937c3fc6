use {super::Xorshift32, std::path::PathBuf};

/// Infinite source of Unix-domain socket paths in the temporary directory.
#[derive(Copy, Clone, Debug)]
pub struct NameGen {
    rng: Xorshift32,
}
impl NameGen {
    pub fn new(id: &'static str) -> Self { Self { rng: Xorshift32::from_id(id) } }
}
impl Iterator for NameGen {
    type Item = PathBuf;
    fn next(&mut self) -> Option<Self::Item> {
        Some(std::env::temp_dir().join(format!("sockmux-test-{:08x}.sock", self.rng.next())))
    }
}

/// A path that is removed when dropped.
#[derive(Debug)]
pub struct TempPath(pub PathBuf);
impl TempPath {
    pub fn fresh(id: &'static str) -> Self {
        let path = NameGen::new(id).find(|p| !p.exists()).unwrap();
        Self(path)
    }
}
impl Drop for TempPath {
    fn drop(&mut self) { let _ = std::fs::remove_file(&self.0); }
}

macro_rules! make_id {
    () => {
        concat!(file!(), line!(), column!())
    };
}
