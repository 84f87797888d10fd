use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::table::EpisodeTable;

/// File name prefix of persisted best-episode tables
pub const BEST_EPISODE_PREFIX: &str = "best_episode_details";

/// File name of the persisted best policy
pub const BEST_MODEL_NAME: &str = "best_model";

/// Writes the policy artifact to the given path
pub type PolicySaver = Box<dyn FnMut(&Path) -> io::Result<()>>;

/// Keeps the best episode table and policy artifact in a log directory
///
/// Both artifacts are written next to their final location and renamed into place, so
/// a reader never sees a half-written file.
pub struct BestEpisodeStore {
    dir: PathBuf,
    policy_saver: Option<PolicySaver>,
}

impl BestEpisodeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            policy_saver: None,
        }
    }

    pub fn with_policy_saver(mut self, saver: PolicySaver) -> Self {
        self.policy_saver = Some(saver);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join(BEST_MODEL_NAME)
    }

    pub fn table_path(&self, episode: u64) -> PathBuf {
        self.dir.join(format!("{BEST_EPISODE_PREFIX}_{episode}.csv"))
    }

    /// Persist the policy and the episode table, replacing any previous best
    pub fn save(&mut self, episode: u64, table: &EpisodeTable) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        self.save_policy()?;
        self.save_table(episode, table)
    }

    fn save_policy(&mut self) -> io::Result<()> {
        let Some(saver) = self.policy_saver.as_mut() else {
            debug!("No policy saver registered, skipping best model");
            return Ok(());
        };
        let dest = self.dir.join(BEST_MODEL_NAME);
        let tmp = self.dir.join(format!("{BEST_MODEL_NAME}.tmp"));
        saver(&tmp)?;
        if dest.is_dir() {
            fs::remove_dir_all(&dest)?;
        }
        fs::rename(&tmp, &dest)?;
        info!("Saved new best model to {}", dest.display());
        Ok(())
    }

    fn save_table(&self, episode: u64, table: &EpisodeTable) -> io::Result<()> {
        let dest = self.table_path(episode);
        let tmp = dest.with_extension("csv.tmp");

        let mut writer = BufWriter::new(File::create(&tmp)?);
        table.write_csv(&mut writer)?;
        drop(writer);

        if let Err(e) = fs::rename(&tmp, &dest) {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                debug!("Could not remove {}: {}", tmp.display(), cleanup);
            }
            return Err(e);
        }

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_old_best = path.file_name().and_then(|n| n.to_str()).is_some_and(|n| {
                n.starts_with(BEST_EPISODE_PREFIX) && n.ends_with(".csv")
            });
            if is_old_best && path != dest {
                fs::remove_file(&path)?;
                debug!("Removed previous best episode file {}", path.display());
            }
        }

        info!("Saved best episode details to {}", dest.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::table::Cell;

    fn table(n: i64) -> EpisodeTable {
        EpisodeTable {
            columns: vec!["timestep".into()],
            rows: (1..=n).map(|i| vec![Cell::Int(i)]).collect(),
        }
    }

    #[test]
    fn replaces_previous_best() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BestEpisodeStore::new(dir.path()).with_policy_saver(Box::new(|path: &Path| {
            fs::write(path, b"weights")
        }));

        store.save(3, &table(2)).unwrap();
        assert!(store.table_path(3).exists(), "first best written");
        assert_eq!(fs::read(store.model_path()).unwrap(), b"weights", "policy written");

        store.save(7, &table(4)).unwrap();
        assert!(!store.table_path(3).exists(), "previous best removed");
        let csv = fs::read_to_string(store.table_path(7)).unwrap();
        assert_eq!(csv.lines().count(), 5, "header plus four rows");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|n| n.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "no temporary files left: {leftovers:?}");
    }

    #[test]
    fn previous_best_kept_when_rename_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BestEpisodeStore::new(dir.path());
        store.save(3, &table(2)).unwrap();

        // A non-empty directory cannot be replaced by a file
        let blocked = store.table_path(7);
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("keep"), b"x").unwrap();

        assert!(store.save(7, &table(4)).is_err());
        assert!(store.table_path(3).exists(), "previous best still in place");
        assert!(!blocked.with_extension("csv.tmp").exists(), "temporary file cleaned up");
    }

    #[test]
    fn failing_policy_saver_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BestEpisodeStore::new(dir.path()).with_policy_saver(Box::new(|_: &Path| {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }));
        assert!(store.save(1, &table(1)).is_err());
        assert!(!store.model_path().exists(), "nothing half written");
    }
}
