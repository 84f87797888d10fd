mod persist;
mod table;

pub use persist::{BestEpisodeStore, PolicySaver, BEST_EPISODE_PREFIX, BEST_MODEL_NAME};
pub use table::{Cell, ColumnKind, EpisodeTable};

use log::{error, info, warn};

use crate::{
    ds::RingBuffer,
    error::GatewayError,
    snapshot::ExternalActionPayload,
    space::ActionSpaceVariant,
    transport::Info,
    util::{fit_len, transpose},
};

/// Number of completed episodes averaged by the best-episode objective
pub const ROLLING_EPISODES: usize = 100;

/// Info fields recorded every step, with the value used when a step's info lacks them
const INFO_COLUMNS: [(&str, ColumnKind, Cell); 12] = [
    ("reward_wait_time", ColumnKind::Float, Cell::Float(0.0)),
    ("reward_unutilization", ColumnKind::Float, Cell::Float(0.0)),
    ("reward_cost", ColumnKind::Float, Cell::Float(0.0)),
    ("reward_queue_penalty", ColumnKind::Float, Cell::Float(0.0)),
    ("reward_invalid_action", ColumnKind::Float, Cell::Float(0.0)),
    ("assignment_success", ColumnKind::Bool, Cell::Bool(false)),
    ("create_vm_success", ColumnKind::Bool, Cell::Bool(false)),
    ("destroy_vm_success", ColumnKind::Bool, Cell::Bool(false)),
    ("invalid_action_taken", ColumnKind::Bool, Cell::Bool(false)),
    ("host_affected_id", ColumnKind::Int, Cell::Int(-1)),
    ("cores_changed", ColumnKind::Int, Cell::Int(0)),
    ("actual_vm_count", ColumnKind::Int, Cell::Int(0)),
];

const SCALING_ACTION_COLUMNS: [&str; 4] = ["action_type", "target_vm_id", "target_host_id", "vm_type_index"];
const LOAD_BALANCING_ACTION_COLUMNS: [&str; 1] = ["target_vm_id"];

/// A per-step sequence of one recorded field
#[derive(Debug, Clone)]
struct Column {
    name: &'static str,
    kind: ColumnKind,
    values: Vec<Cell>,
}

impl Column {
    fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            values: Vec::new(),
        }
    }
}

/// What a finished episode looked like, handed to episode-end callbacks
#[derive(Debug, Clone)]
pub struct EpisodeSummary {
    /// 1-based ordinal of the episode
    pub episode: u64,
    pub length: usize,
    pub total_reward: f64,
    /// Rolling mean of the last [`ROLLING_EPISODES`] episode rewards, this one included
    pub mean_reward: f64,
    pub best_mean_reward: f64,
    /// This episode raised the best rolling mean
    pub improved: bool,
    pub table: EpisodeTable,
}

/// Callback invoked with every finished episode
pub type EpisodeCallback = Box<dyn FnMut(&EpisodeSummary)>;

/// Collects per-step records and keeps the best episode seen so far
///
/// Records accumulate until a terminated or truncated step arrives. That step closes
/// the episode: its table is assembled, the rolling mean reward is compared with the
/// best so far, a [`BestEpisodeStore`] (if any) persists improvements, callbacks run,
/// and the accumulators start over.
///
/// Persistence failures are logged and never interrupt the decision loop.
pub struct EpisodeTelemetry {
    action_columns: Vec<Column>,
    reward: Column,
    clock: Column,
    info_columns: Vec<Column>,
    steps: usize,
    total_steps: u64,
    episodes: u64,
    returns: RingBuffer<f64>,
    best_mean_reward: f64,
    store: Option<BestEpisodeStore>,
    callbacks: Vec<EpisodeCallback>,
}

impl EpisodeTelemetry {
    pub fn new(variant: ActionSpaceVariant) -> Self {
        let action_names: &[&'static str] = match variant {
            ActionSpaceVariant::Scaling => &SCALING_ACTION_COLUMNS,
            ActionSpaceVariant::LoadBalancing => &LOAD_BALANCING_ACTION_COLUMNS,
        };
        Self {
            action_columns: action_names
                .iter()
                .map(|&n| Column::new(n, ColumnKind::Int))
                .collect(),
            reward: Column::new("reward_total", ColumnKind::Float),
            clock: Column::new("clock", ColumnKind::Float),
            info_columns: INFO_COLUMNS
                .iter()
                .map(|(n, kind, _)| Column::new(*n, *kind))
                .collect(),
            steps: 0,
            total_steps: 0,
            episodes: 0,
            returns: RingBuffer::new(ROLLING_EPISODES),
            best_mean_reward: f64::NEG_INFINITY,
            store: None,
            callbacks: Vec::new(),
        }
    }

    /// Persist improved episodes through `store`
    pub fn with_store(mut self, store: BestEpisodeStore) -> Self {
        self.set_store(store);
        self
    }

    pub fn set_store(&mut self, store: BestEpisodeStore) {
        self.store = Some(store);
    }

    /// Register a callback run after every finished episode
    pub fn on_episode_end(&mut self, callback: EpisodeCallback) {
        self.callbacks.push(callback);
    }

    /// Steps recorded in the current episode
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Finished episodes
    pub fn episodes(&self) -> u64 {
        self.episodes
    }

    pub fn best_mean_reward(&self) -> f64 {
        self.best_mean_reward
    }

    /// Record one step
    ///
    /// **Returns** the episode summary when `done` closes the episode
    pub fn record(
        &mut self,
        action: &ExternalActionPayload,
        reward: f64,
        info: &Info,
        done: bool,
    ) -> Option<EpisodeSummary> {
        let action = action.to_vec();
        for (i, column) in self.action_columns.iter_mut().enumerate() {
            column
                .values
                .push(action.get(i).map_or(Cell::Int(0), |&a| Cell::Int(a)));
        }
        self.reward.values.push(Cell::Float(reward));
        self.clock.values.push(
            info.get("current_clock")
                .and_then(|v| Cell::from_json(v, ColumnKind::Float))
                .unwrap_or(Cell::Float(0.0)),
        );
        for (column, (_, _, default)) in self.info_columns.iter_mut().zip(INFO_COLUMNS.iter()) {
            let cell = info
                .get(column.name)
                .and_then(|v| Cell::from_json(v, column.kind))
                .unwrap_or_else(|| default.clone());
            column.values.push(cell);
        }
        self.steps += 1;
        self.total_steps += 1;

        done.then(|| self.finish_episode())
    }

    fn columns_mut(&mut self) -> impl Iterator<Item = &mut Column> {
        std::iter::once(&mut self.clock)
            .chain(self.action_columns.iter_mut())
            .chain(std::iter::once(&mut self.reward))
            .chain(self.info_columns.iter_mut())
    }

    /// Assemble the current episode's table, one row per recorded step
    pub fn assemble(&mut self) -> EpisodeTable {
        let len = self.steps;
        let first_step = self.total_steps + 1 - len as u64;

        for column in self.columns_mut() {
            let recorded = column.values.len();
            if fit_len(&mut column.values, len, Cell::padding(column.kind)) {
                warn!(
                    "Length mismatch for `{}` in episode details: expected {}, got {}",
                    column.name, len, recorded
                );
            }
        }

        let timestep = (0..len as u64)
            .map(|i| Cell::Int((first_step + i) as i64))
            .collect::<Vec<_>>();

        let mut names = vec!["timestep".to_owned()];
        let mut values = vec![timestep];
        for column in self.columns_mut() {
            names.push(column.name.to_owned());
            values.push(column.values.clone());
        }

        EpisodeTable {
            columns: names,
            rows: transpose(values),
        }
    }

    fn finish_episode(&mut self) -> EpisodeSummary {
        self.episodes += 1;
        let table = self.assemble();

        let total_reward: f64 = self.reward.values.iter().filter_map(Cell::as_f64).sum();
        self.returns.push(total_reward);
        let mean_reward = self.returns.mean().unwrap_or(total_reward);

        info!(
            "Episode {} finished after {} steps: reward {:.3}, rolling mean {:.3}, best {:.3}",
            self.episodes, self.steps, total_reward, mean_reward, self.best_mean_reward
        );

        let improved = mean_reward > self.best_mean_reward;
        if improved {
            self.best_mean_reward = mean_reward;
            info!("New best mean reward: {:.3}", mean_reward);
            match self.store.as_mut() {
                Some(store) => {
                    if let Err(e) = store.save(self.episodes, &table) {
                        error!("{}", GatewayError::TelemetryPersistence(e));
                    }
                }
                None => warn!("No log directory configured, best episode not persisted"),
            }
        }

        let summary = EpisodeSummary {
            episode: self.episodes,
            length: self.steps,
            total_reward,
            mean_reward,
            best_mean_reward: self.best_mean_reward,
            improved,
            table,
        };

        for callback in self.callbacks.iter_mut() {
            callback(&summary);
        }

        self.clear();
        summary
    }

    /// Drop every record of the current episode
    pub fn clear(&mut self) {
        for column in self.columns_mut() {
            column.values.clear();
        }
        self.steps = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, fs, rc::Rc};

    use serde_json::json;

    use super::*;

    fn info(clock: f64) -> Info {
        json!({
            "current_clock": clock,
            "assignment_success": true,
            "host_affected_id": 2,
            "reward_cost": -0.25,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn noop() -> ExternalActionPayload {
        ExternalActionPayload::Scaling([0, 0, 0, 0])
    }

    #[test]
    fn episode_boundary() {
        let mut t = EpisodeTelemetry::new(ActionSpaceVariant::Scaling);
        const N: usize = 5;
        for i in 0..N {
            assert!(t.record(&noop(), 1.0, &info(i as f64), false).is_none(), "still running");
        }
        assert_eq!(t.steps(), N, "one record per step");

        let summary = t
            .record(&ExternalActionPayload::Scaling([2, 0, 1, 2]), -1.0, &Info::new(), true)
            .expect("terminal step closes the episode");

        assert_eq!(summary.table.len(), N + 1, "N + 1 rows");
        assert_eq!(summary.length, N + 1);
        assert_eq!(summary.total_reward, 4.0);
        assert_eq!(t.steps(), 0, "accumulators empty after the episode");
        assert_eq!(t.episodes(), 1);

        let table = &summary.table;
        assert_eq!(table.columns[..3], ["timestep", "clock", "action_type"]);
        assert_eq!(table.columns.len(), 1 + 1 + 4 + 1 + INFO_COLUMNS.len());
        assert_eq!(table.column("timestep").unwrap()[5], &Cell::Int(6));
        assert_eq!(table.column("action_type").unwrap()[5], &Cell::Int(2));
        assert_eq!(table.column("assignment_success").unwrap()[0], &Cell::Bool(true));
        assert_eq!(
            table.column("host_affected_id").unwrap()[5],
            &Cell::Int(-1),
            "missing field takes its default"
        );
        assert_eq!(table.column("reward_cost").unwrap()[0], &Cell::Float(-0.25));
        assert_eq!(table.column("clock").unwrap()[4], &Cell::Float(4.0));
    }

    #[test]
    fn timesteps_continue_across_episodes() {
        let mut t = EpisodeTelemetry::new(ActionSpaceVariant::LoadBalancing);
        let a = ExternalActionPayload::Assign(-1);
        t.record(&a, 0.0, &Info::new(), false);
        t.record(&a, 0.0, &Info::new(), true);
        t.record(&a, 0.0, &Info::new(), false);
        let summary = t.record(&a, 0.0, &Info::new(), true).unwrap();
        assert_eq!(
            summary.table.column("timestep").unwrap(),
            [&Cell::Int(3), &Cell::Int(4)],
            "global step numbering"
        );
        assert_eq!(summary.table.column("target_vm_id").unwrap()[0], &Cell::Int(-1));
        assert_eq!(summary.episode, 2);
    }

    #[test]
    fn assemble_pads_diverging_columns() {
        let mut t = EpisodeTelemetry::new(ActionSpaceVariant::Scaling);
        t.record(&noop(), 1.0, &info(0.0), false);
        t.record(&noop(), 1.0, &info(1.0), false);
        t.info_columns[5].values.pop();
        t.reward.values.pop();

        let table = t.assemble();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.column("assignment_success").unwrap()[1],
            &Cell::Missing,
            "non-numeric padded with missing"
        );
        assert_eq!(table.column("reward_total").unwrap()[1], &Cell::Float(0.0), "numeric padded with 0");
    }

    #[test]
    fn best_episode_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let saves = Rc::new(RefCell::new(0));
        let counter = saves.clone();
        let store = BestEpisodeStore::new(dir.path()).with_policy_saver(Box::new(
            move |path: &std::path::Path| {
                *counter.borrow_mut() += 1;
                fs::write(path, b"policy")
            },
        ));
        let mut t = EpisodeTelemetry::new(ActionSpaceVariant::Scaling).with_store(store);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        t.on_episode_end(Box::new(move |s: &EpisodeSummary| {
            sink.borrow_mut().push((s.episode, s.improved))
        }));

        // Episode returns 2, 1, 6 -> rolling means 2, 1.5, 3
        for reward in [2.0, 1.0, 6.0] {
            t.record(&noop(), reward, &Info::new(), true);
        }

        assert_eq!(*seen.borrow(), [(1, true), (2, false), (3, true)], "callbacks saw every episode");
        assert_eq!(*saves.borrow(), 2, "policy saved on each improvement");
        assert_eq!(t.best_mean_reward(), 3.0);

        let tables: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|n| n.starts_with(BEST_EPISODE_PREFIX))
            .collect();
        assert_eq!(tables, ["best_episode_details_3.csv"], "only the latest best kept");
    }

    #[test]
    fn persistence_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"").unwrap();
        let mut t = EpisodeTelemetry::new(ActionSpaceVariant::Scaling)
            .with_store(BestEpisodeStore::new(blocker.join("logs")));

        let summary = t.record(&noop(), 1.0, &Info::new(), true).unwrap();
        assert!(summary.improved, "still tracked as best");
        assert_eq!(t.steps(), 0, "accumulators cleared");
    }
}
