// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! Q-learning agent
//!
//! Tabular agent over the discretized (throughput, rtt, loss) state space
//! with five connection-delta actions. Action selection is ε-greedy with a
//! decaying rate, boosted exploration in rarely-seen states, and a
//! tie-break bias toward "no change" while the recent action history is
//! oscillating. Chosen deltas pass through safety constraints that keep the
//! pool inside the optimal band under good conditions and damp growth under
//! bad ones.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};

use crate::constants::{
    BONUS_BAND, EXTENDED_BAND, OPTIMAL_BAND, OSCILLATION_WINDOW, Q_VALUE_RANGE,
    REWARD_CAP, RL_EXPLORATION_BOOST_CAP, RL_RARE_STATE_VISITS, UTILITY_EPSILON,
};
use crate::metrics::MetricSample;
use crate::qtable::{QTable, StateKey, ACTION_COUNT};

/// Connection-count delta per action id
pub const ACTION_DELTAS: [i64; ACTION_COUNT] = [2, 1, 0, -1, -2];

/// Action id for "no change"
pub const ACTION_HOLD: usize = 2;

/// Agent hyper-parameters
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub learning_rate: f64,
    pub discount_factor: f64,
    pub exploration_rate: f64,
    pub min_exploration: f64,
    pub exploration_decay: f64,
    pub min_connections: usize,
    pub max_connections: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            learning_rate: crate::constants::RL_LEARNING_RATE,
            discount_factor: crate::constants::RL_DISCOUNT_FACTOR,
            exploration_rate: crate::constants::RL_EXPLORATION_RATE,
            min_exploration: crate::constants::RL_MIN_EXPLORATION,
            exploration_decay: crate::constants::RL_EXPLORATION_DECAY,
            min_connections: crate::constants::MIN_STREAMS,
            max_connections: crate::constants::MAX_STREAMS,
        }
    }
}

/// Map raw metrics onto the 6x4x5 discrete state space
pub fn discretize(throughput_mbps: f64, rtt_ms: f64, loss_pct: f64) -> StateKey {
    let throughput_level = match throughput_mbps {
        t if t < 10.0 => 0,
        t if t < 20.0 => 1,
        t if t < 30.0 => 2,
        t if t < 40.0 => 3,
        t if t < 50.0 => 4,
        _ => 5,
    };

    let rtt_level = match rtt_ms {
        r if r < 30.0 => 0,
        r if r < 80.0 => 1,
        r if r < 150.0 => 2,
        _ => 3,
    };

    let loss_level = match loss_pct {
        l if l < 0.1 => 0,
        l if l < 0.5 => 1,
        l if l < 1.0 => 2,
        l if l < 2.0 => 3,
        _ => 4,
    };

    (throughput_level, rtt_level, loss_level)
}

/// Utility of running `num_streams` connections at the observed throughput
/// and loss. Trades raw throughput against loss, per-stream cost tiers, and
/// band bonuses around the preferred connection range.
pub fn utility(throughput_mbps: f64, loss_pct: f64, num_streams: usize) -> f64 {
    let t = throughput_mbps;
    let n = num_streams;
    let loss = (loss_pct / 100.0).clamp(1e-4, 0.1);

    let throughput_value = t * (1.0 - t / (t + 100.0));
    let loss_penalty = t * loss * loss * 30.0;

    let stream_cost = if n <= 6 {
        n as f64 * 0.3
    } else if n <= 10 {
        n as f64 * 0.5
    } else if n <= 14 {
        n as f64 * 1.0
    } else {
        n as f64 * 2.0
    };

    let efficiency = if n > 0 { t / n as f64 } else { 0.0 };
    let efficiency_bonus = if efficiency > 4.0 {
        (0.8 * efficiency).min(10.0)
    } else {
        0.0
    };

    let band_bonus = if (BONUS_BAND.0..=BONUS_BAND.1).contains(&n) {
        12.0
    } else if (EXTENDED_BAND.0..=EXTENDED_BAND.1).contains(&n) {
        5.0
    } else {
        0.0
    };

    throughput_value - loss_penalty - stream_cost + efficiency_bonus + band_bonus
}

/// Reward for the utility change between two samples at `num_streams`
/// connections. Inside the dead band the reward is 0; outside it the sign
/// follows the utility change and the magnitude is capped.
pub fn reward(
    prev_throughput: f64,
    curr_throughput: f64,
    prev_loss_pct: f64,
    curr_loss_pct: f64,
    num_streams: usize,
) -> f64 {
    let prev_utility = utility(prev_throughput, prev_loss_pct, num_streams);
    let curr_utility = utility(curr_throughput, curr_loss_pct, num_streams);
    let diff = curr_utility - prev_utility;

    let in_band = (OPTIMAL_BAND.0..=OPTIMAL_BAND.1).contains(&num_streams);
    let threshold = UTILITY_EPSILON * if in_band { 0.7 } else { 1.0 };

    if diff > threshold {
        REWARD_CAP.min(1.0 + diff.abs() / 10.0)
    } else if diff < -threshold {
        -REWARD_CAP.min(1.0 + diff.abs() / 10.0)
    } else {
        0.0
    }
}

/// Tabular Q-learning agent
pub struct QLearningAgent {
    config: AgentConfig,
    table: QTable,
    exploration_rate: f64,
    visits: HashMap<StateKey, u32>,
    action_history: VecDeque<usize>,
    rng: StdRng,
}

impl std::fmt::Debug for QLearningAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QLearningAgent")
            .field("states", &self.table.len())
            .field("exploration_rate", &self.exploration_rate)
            .finish()
    }
}

impl QLearningAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic agent for tests and simulations
    pub fn with_seed(config: AgentConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: AgentConfig, rng: StdRng) -> Self {
        let exploration_rate = config.exploration_rate;
        Self {
            config,
            table: QTable::new(),
            exploration_rate,
            visits: HashMap::new(),
            action_history: VecDeque::with_capacity(OSCILLATION_WINDOW + 1),
            rng,
        }
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut QTable {
        &mut self.table
    }

    /// Replace the table, e.g. after loading from disk
    pub fn set_table(&mut self, table: QTable) {
        self.table = table;
    }

    pub fn exploration_rate(&self) -> f64 {
        self.exploration_rate
    }

    /// Restore a persisted exploration rate, never dropping below the floor
    pub fn set_exploration_rate(&mut self, rate: f64) {
        self.exploration_rate = rate.max(self.config.min_exploration);
    }

    /// Pick an action for `state` with ε-greedy selection. Decays ε, boosts
    /// exploration in states seen fewer than three times, and biases tied
    /// argmax sets toward holding while the action history oscillates.
    pub fn choose_action(&mut self, state: StateKey) -> usize {
        self.exploration_rate =
            (self.exploration_rate * self.config.exploration_decay).max(self.config.min_exploration);

        let prior_visits = {
            let entry = self.visits.entry(state).or_insert(0);
            let prior = *entry;
            *entry += 1;
            prior
        };

        let effective_epsilon = if prior_visits < RL_RARE_STATE_VISITS {
            (self.exploration_rate * 2.0).min(RL_EXPLORATION_BOOST_CAP)
        } else {
            self.exploration_rate
        };

        let action = if self.rng.gen::<f64>() < effective_epsilon {
            self.rng.gen_range(0..ACTION_COUNT)
        } else {
            self.exploit(state)
        };

        self.action_history.push_back(action);
        while self.action_history.len() > OSCILLATION_WINDOW + 1 {
            self.action_history.pop_front();
        }

        action
    }

    fn exploit(&mut self, state: StateKey) -> usize {
        let values = self
            .table
            .get(state)
            .copied()
            .unwrap_or([0.0; ACTION_COUNT]);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let best: Vec<usize> = (0..ACTION_COUNT).filter(|&a| values[a] == max).collect();

        if best.len() > 1 && best.contains(&ACTION_HOLD) && self.is_oscillating() {
            return ACTION_HOLD;
        }

        best[self.rng.gen_range(0..best.len())]
    }

    /// Last four actions strictly alternating between increases and
    /// decreases
    fn is_oscillating(&self) -> bool {
        if self.action_history.len() < OSCILLATION_WINDOW {
            return false;
        }
        let signs: Vec<i64> = self
            .action_history
            .iter()
            .rev()
            .take(OSCILLATION_WINDOW)
            .map(|&a| ACTION_DELTAS[a].signum())
            .collect();
        signs.iter().all(|&s| s != 0) && signs.windows(2).all(|w| w[0] != w[1])
    }

    /// Apply a chosen action under the safety constraints, returning the new
    /// connection count in `[min_connections, max_connections]`.
    ///
    /// With at least three recent samples: good conditions force the result
    /// into the optimal band, and poor conditions cap any increase at +1.
    pub fn apply_constraints(
        &self,
        action: usize,
        current: usize,
        recent: &[MetricSample],
    ) -> usize {
        let delta = ACTION_DELTAS[action];
        let unclamped = current as i64 + delta;
        let mut new = unclamped.clamp(
            self.config.min_connections as i64,
            self.config.max_connections as i64,
        ) as usize;

        if recent.len() >= 3 {
            let window = &recent[recent.len() - 3..];
            let len = window.len() as f64;
            let avg_throughput = window.iter().map(|m| m.throughput_mbps).sum::<f64>() / len;
            let avg_loss = window.iter().map(|m| m.loss_pct).sum::<f64>() / len;
            let avg_rtt = window.iter().map(|m| m.rtt_ms).sum::<f64>() / len;

            if avg_throughput > 30.0 && avg_loss < 0.5 && avg_rtt < 100.0 {
                new = new.clamp(OPTIMAL_BAND.0, OPTIMAL_BAND.1);
            } else if avg_loss > 2.0 || avg_rtt > 200.0 {
                if delta > 0 {
                    new = new.min(current + 1);
                }
            }
        }

        new.clamp(self.config.min_connections, self.config.max_connections)
    }

    /// Classic tabular Q update with the value clipped to [-10, 10].
    /// The step size doubles for rewards with magnitude above 1.
    pub fn update(&mut self, state: StateKey, action: usize, reward: f64, next_state: StateKey) {
        let current = self.table.value(state, action);
        let max_next = self.table.max_value(next_state);

        let td_target = reward + self.config.discount_factor * max_next;
        let td_error = td_target - current;

        let learning_rate = if reward.abs() > 1.0 {
            self.config.learning_rate * 2.0
        } else {
            self.config.learning_rate
        };

        let new_value =
            (current + learning_rate * td_error).clamp(Q_VALUE_RANGE.0, Q_VALUE_RANGE.1);
        self.table.set(state, action, new_value);
    }

    /// Forget everything learned, keeping the configuration
    pub fn reset(&mut self) {
        self.table.clear();
        self.visits.clear();
        self.action_history.clear();
        self.exploration_rate = self.config.exploration_rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(throughput: f64, rtt: f64, loss: f64) -> MetricSample {
        MetricSample {
            throughput_mbps: throughput,
            rtt_ms: rtt,
            loss_pct: loss,
            sampled_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_discretize_boundaries() {
        assert_eq!(discretize(0.0, 0.0, 0.0), (0, 0, 0));
        assert_eq!(discretize(10.0, 30.0, 0.1), (1, 1, 1));
        assert_eq!(discretize(49.9, 149.9, 1.9), (4, 2, 3));
        assert_eq!(discretize(80.0, 300.0, 3.0), (5, 3, 4));
    }

    #[test]
    fn test_utility_prefers_band() {
        // Same network, band count beats an excessive count
        let in_band = utility(40.0, 0.2, 8);
        let above = utility(40.0, 0.2, 16);
        assert!(in_band > above);
    }

    #[test]
    fn test_reward_dead_band() {
        // Identical metrics produce zero reward
        assert_eq!(reward(30.0, 30.0, 0.2, 0.2, 8), 0.0);
    }

    #[test]
    fn test_reward_sign_and_cap() {
        let up = reward(10.0, 40.0, 0.2, 0.2, 8);
        assert!(up > 0.0);
        assert!(up <= REWARD_CAP);

        let down = reward(40.0, 10.0, 0.2, 0.2, 8);
        assert!(down < 0.0);
        assert!(down >= -REWARD_CAP);
    }

    #[test]
    fn test_update_clamps_q_values() {
        let mut agent = QLearningAgent::with_seed(AgentConfig::default(), 7);
        let state = (1, 1, 1);
        for _ in 0..500 {
            agent.update(state, 0, 3.0, state);
        }
        let value = agent.table().value(state, 0);
        assert!(value <= Q_VALUE_RANGE.1);

        for _ in 0..500 {
            agent.update(state, 0, -3.0, state);
        }
        let value = agent.table().value(state, 0);
        assert!(value >= Q_VALUE_RANGE.0);
    }

    #[test]
    fn test_constraints_respect_absolute_bounds() {
        let agent = QLearningAgent::with_seed(AgentConfig::default(), 7);
        assert_eq!(agent.apply_constraints(4, 1, &[]), 1);
        assert_eq!(agent.apply_constraints(0, 16, &[]), 16);
        assert_eq!(agent.apply_constraints(1, 4, &[]), 5);
    }

    #[test]
    fn test_good_conditions_force_band() {
        let agent = QLearningAgent::with_seed(AgentConfig::default(), 7);
        let good = vec![
            sample(45.0, 40.0, 0.2),
            sample(42.0, 50.0, 0.1),
            sample(48.0, 60.0, 0.3),
        ];
        // A decrease from 6 is pulled back up into the band
        assert_eq!(agent.apply_constraints(4, 6, &good), 6);
        // An increase past 12 is pulled back down
        assert_eq!(agent.apply_constraints(0, 12, &good), 12);
    }

    #[test]
    fn test_poor_conditions_cap_increase() {
        let agent = QLearningAgent::with_seed(AgentConfig::default(), 7);
        let poor = vec![
            sample(5.0, 300.0, 3.0),
            sample(4.0, 280.0, 2.5),
            sample(6.0, 320.0, 4.0),
        ];
        // +2 becomes +1
        assert_eq!(agent.apply_constraints(0, 4, &poor), 5);
        // Decreases pass through
        assert_eq!(agent.apply_constraints(3, 4, &poor), 3);
    }

    #[test]
    fn test_exploration_decays_to_floor() {
        let mut agent = QLearningAgent::with_seed(AgentConfig::default(), 7);
        for _ in 0..5000 {
            agent.choose_action((0, 0, 0));
        }
        let rate = agent.exploration_rate();
        assert!((rate - crate::constants::RL_MIN_EXPLORATION).abs() < 1e-9);
    }
}
