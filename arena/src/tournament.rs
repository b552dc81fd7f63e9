//! Round-robin and gauntlet tournaments as task sources.
//!
//! Every pairing of two engines is its own [`TaskSource`]. A pairing plays
//! each opening twice, once with each engine as white, then moves on to the
//! next opening. Failed games are handed out again a limited number of times.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chess::{Position, STARTING_FEN};
use engine::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ArenaError, PoolError};
use crate::pool::GameManagerPool;
use crate::record::GameRecord;
use crate::task::{GameTask, TaskSource};
use crate::time_control::TimeControl;

/// Attempts per game before it is given up.
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentFormat {
    /// Every engine plays every other engine.
    #[default]
    RoundRobin,
    /// The first engine plays each of the others.
    Gauntlet,
}

fn default_rounds() -> u32 {
    1
}

fn default_games_per_pairing() -> u32 {
    2
}

/// Tournament definition, usually loaded from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentConfig {
    pub name: String,
    #[serde(default)]
    pub format: TournamentFormat,
    pub engines: Vec<EngineConfig>,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// Games per pairing and round.
    #[serde(default = "default_games_per_pairing")]
    pub games_per_pairing: u32,
    /// Start positions as FEN. Empty means the standard start position.
    #[serde(default)]
    pub openings: Vec<String>,
    #[serde(default)]
    pub time_control: TimeControl,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

impl TournamentConfig {
    pub fn load(path: &Path) -> Result<Self, ArenaError> {
        let text = std::fs::read_to_string(path).map_err(|source| ArenaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.engines.len() < 2 {
            return Err(ArenaError::InvalidTournament(
                "at least two engines are required".to_string(),
            ));
        }
        let mut names: Vec<&str> = self.engines.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ArenaError::InvalidTournament(format!(
                "duplicate engine name '{}'",
                pair[0]
            )));
        }
        if self.rounds == 0 || self.games_per_pairing == 0 {
            return Err(ArenaError::InvalidTournament(
                "rounds and games_per_pairing must be positive".to_string(),
            ));
        }
        for opening in &self.openings {
            Position::from_fen(opening)?;
        }
        Ok(())
    }

    /// Engine index pairs that meet.
    pub fn pairings(&self) -> Vec<(usize, usize)> {
        let count = self.engines.len();
        match self.format {
            TournamentFormat::RoundRobin => (0..count)
                .flat_map(|i| ((i + 1)..count).map(move |j| (i, j)))
                .collect(),
            TournamentFormat::Gauntlet => (1..count).map(|j| (0, j)).collect(),
        }
    }

    fn opening(&self, index: usize) -> &str {
        if self.openings.is_empty() {
            STARTING_FEN
        } else {
            &self.openings[index % self.openings.len()]
        }
    }
}

/// Results of one pairing from the first engine's point of view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub first_wins: u32,
    pub second_wins: u32,
    pub draws: u32,
    /// Games given up after repeated failures.
    pub failed: u32,
}

impl Tally {
    pub fn games(&self) -> u32 {
        self.first_wins + self.second_wins + self.draws
    }
}

#[derive(Default)]
struct PairingState {
    pending: VecDeque<GameTask>,
    in_flight: usize,
    attempts: HashMap<u64, u32>,
    tally: Tally,
    records: Vec<GameRecord>,
}

/// The games between two engines.
pub struct Pairing {
    name: String,
    first: EngineConfig,
    second: EngineConfig,
    state: Mutex<PairingState>,
}

impl Pairing {
    fn new(name: String, first: EngineConfig, second: EngineConfig, tasks: Vec<GameTask>) -> Self {
        Self {
            name,
            first,
            second,
            state: Mutex::new(PairingState {
                pending: tasks.into(),
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PairingState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn engines(&self) -> Vec<EngineConfig> {
        vec![self.first.clone(), self.second.clone()]
    }

    pub fn tally(&self) -> Tally {
        self.lock().tally
    }

    pub fn records(&self) -> Vec<GameRecord> {
        self.lock().records.clone()
    }

    pub fn is_complete(&self) -> bool {
        let state = self.lock();
        state.pending.is_empty() && state.in_flight == 0
    }
}

impl TaskSource for Pairing {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_task(&self, _manager_id: usize) -> GameTask {
        let mut state = self.lock();
        match state.pending.pop_front() {
            Some(task) => {
                state.in_flight += 1;
                task
            }
            None => GameTask::none(),
        }
    }

    fn task_completed(&self, task: &GameTask, record: &GameRecord) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);

        let Some(white_score) = record.result.white_score() else {
            tracing::warn!(pairing = %self.name, task = task.id, "Game completed without a result");
            state.tally.failed += 1;
            return;
        };
        // Without a switch the first engine plays white.
        let first_score = if task.switch_side {
            1.0 - white_score
        } else {
            white_score
        };
        if first_score > 0.5 {
            state.tally.first_wins += 1;
        } else if first_score < 0.5 {
            state.tally.second_wins += 1;
        } else {
            state.tally.draws += 1;
        }
        state.records.push(record.clone());
        tracing::info!(
            pairing = %self.name,
            "{} - {}: {} ({})",
            record.white_name,
            record.black_name,
            record.result,
            record.end_cause
        );
    }

    fn task_failed(&self, task: &GameTask, reason: &str) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        let attempts = state.attempts.entry(task.id).or_insert(0);
        *attempts += 1;
        if *attempts < MAX_ATTEMPTS {
            tracing::warn!(pairing = %self.name, task = task.id, "Game failed ({}), rescheduling", reason);
            state.pending.push_back(task.clone());
        } else {
            tracing::error!(pairing = %self.name, task = task.id, "Game failed {} times, giving up: {}", MAX_ATTEMPTS, reason);
            state.tally.failed += 1;
        }
    }

    fn has_tasks(&self) -> bool {
        !self.lock().pending.is_empty()
    }
}

/// One engine's line in the standings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Standing {
    pub engine: String,
    pub games: u32,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub points: f64,
}

impl Standing {
    fn new(engine: &str) -> Self {
        Self {
            engine: engine.to_string(),
            games: 0,
            wins: 0,
            draws: 0,
            losses: 0,
            points: 0.0,
        }
    }

    fn add(&mut self, wins: u32, draws: u32, losses: u32) {
        self.wins += wins;
        self.draws += draws;
        self.losses += losses;
        self.games += wins + draws + losses;
        self.points = f64::from(self.wins) + 0.5 * f64::from(self.draws);
    }

    pub fn score_percent(&self) -> f64 {
        if self.games == 0 {
            0.0
        } else {
            100.0 * self.points / f64::from(self.games)
        }
    }
}

pub struct Tournament {
    config: TournamentConfig,
    pairings: Vec<Arc<Pairing>>,
}

impl Tournament {
    pub fn new(config: TournamentConfig) -> Result<Self, ArenaError> {
        config.validate()?;

        let mut next_id = 1u64;
        let mut pairings = Vec::new();
        for (i, j) in config.pairings() {
            let first = &config.engines[i];
            let second = &config.engines[j];
            let mut tasks = Vec::new();
            for round in 0..config.rounds {
                for game in 0..config.games_per_pairing {
                    let switched = game % 2 == 1;
                    let opening_index = (round * config.games_per_pairing.div_ceil(2) + game / 2) as usize;
                    let mut record = GameRecord::new(config.opening(opening_index))
                        .with_time_control(config.time_control.clone());
                    let (white, black) = if switched { (second, first) } else { (first, second) };
                    record.white_name = white.name.clone();
                    record.black_name = black.name.clone();
                    record.round = round + 1;
                    record.set_tag("Event", config.name.clone());
                    record.set_tag("Round", (round + 1).to_string());

                    tasks.push(GameTask::play(next_id, record).switched(switched));
                    next_id += 1;
                }
            }
            let name = format!("{} vs {}", first.name, second.name);
            pairings.push(Arc::new(Pairing::new(name, first.clone(), second.clone(), tasks)));
        }

        Ok(Self { config, pairings })
    }

    pub fn config(&self) -> &TournamentConfig {
        &self.config
    }

    pub fn pairings(&self) -> &[Arc<Pairing>] {
        &self.pairings
    }

    pub fn total_games(&self) -> usize {
        self.pairings.len() * (self.config.rounds * self.config.games_per_pairing) as usize
    }

    /// Hand every pairing to `pool`.
    pub fn register(&self, pool: &GameManagerPool) -> Result<(), PoolError> {
        for pairing in &self.pairings {
            pool.add_assignment(pairing.clone(), pairing.engines())?;
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.pairings.iter().all(|p| p.is_complete())
    }

    /// Every finished game.
    pub fn records(&self) -> Vec<GameRecord> {
        self.pairings.iter().flat_map(|p| p.records()).collect()
    }

    /// Standings by points, best first.
    pub fn standings(&self) -> Vec<Standing> {
        let mut table: BTreeMap<&str, Standing> = self
            .config
            .engines
            .iter()
            .map(|e| (e.name.as_str(), Standing::new(&e.name)))
            .collect();

        for pairing in &self.pairings {
            let tally = pairing.tally();
            if let Some(first) = table.get_mut(pairing.first.name.as_str()) {
                first.add(tally.first_wins, tally.draws, tally.second_wins);
            }
            if let Some(second) = table.get_mut(pairing.second.name.as_str()) {
                second.add(tally.second_wins, tally.draws, tally.first_wins);
            }
        }

        let mut standings: Vec<Standing> = table.into_values().collect();
        standings.sort_by(|a, b| {
            b.points
                .total_cmp(&a.points)
                .then_with(|| a.engine.cmp(&b.engine))
        });
        standings
    }
}
