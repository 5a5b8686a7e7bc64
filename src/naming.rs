use std::{
    fs, io,
    path::{Path, PathBuf},
};

use rand::Rng;

const RANDOM_ID_LEN: usize = 10;

/// Source of unique file name stems
pub trait IdGenerator {
    fn next_id(&mut self) -> String;
}

/// Ten random lowercase letters per id
#[derive(Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&mut self) -> String {
        let mut rng = rand::rng();
        (0..RANDOM_ID_LEN)
            .map(|_| rng.random_range(b'a'..=b'z') as char)
            .collect()
    }
}

/// Deterministic `prefix0000`, `prefix0001`, ... ids
pub struct SequentialIds {
    prefix: String,
    next: usize,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 0,
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&mut self) -> String {
        let id = format!("{}{:04}", self.prefix, self.next);
        self.next += 1;
        id
    }
}

/// Hands out fresh paths inside a scratch directory. Nothing is removed
/// afterwards.
pub struct TempNamer<G: IdGenerator> {
    dir: PathBuf,
    ids: G,
}

impl TempNamer<RandomIds> {
    /// Random names under `<system temp>/blockmatching`
    pub fn in_system_temp() -> io::Result<Self> {
        Self::new(std::env::temp_dir().join("blockmatching"), RandomIds)
    }
}

impl<G: IdGenerator> TempNamer<G> {
    pub fn new(dir: impl Into<PathBuf>, ids: G) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, ids })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `extension` includes its leading dot, e.g. `".nii.gz"`
    pub fn path(&mut self, extension: &str) -> PathBuf {
        self.dir.join(format!("{}{extension}", self.ids.next_id()))
    }
}
