// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! RL controller
//!
//! Owns the Q-learning agent, its persistence, and the decision cadence.
//! Every monitoring interval it computes the reward for the previous action
//! from freshly sampled metrics, updates the Q-table, picks the next action,
//! and publishes the resulting connection count through a shared atomic the
//! coordinator reads at each pool tick. Calls inside the interval are
//! no-ops. The controller is constructed explicitly and handed to its
//! owner, so tests can build throwaway instances.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::agent::{discretize, reward, AgentConfig, QLearningAgent, ACTION_DELTAS};
use crate::config::QstreamConfig;
use crate::constants::{OPTIMAL_BAND, RL_HISTORY_LIMIT};
use crate::error::Result;
use crate::metrics::MetricSample;
use crate::qtable::{format_state_key, QTableMeta, QTableStore, StateKey};

/// One learning step, kept in a bounded history for inspection
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub state: String,
    pub action: usize,
    pub reward: f64,
    pub next_state: String,
    pub connections: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub monitoring_interval: Duration,
    pub save_interval: u64,
    pub initial_connections: usize,
    pub agent: AgentConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            monitoring_interval: crate::constants::MONITORING_INTERVAL,
            save_interval: crate::constants::Q_TABLE_SAVE_INTERVAL,
            initial_connections: crate::constants::DEFAULT_NUM_STREAMS,
            agent: AgentConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Derive controller settings from the crate configuration
    pub fn from_config(config: &QstreamConfig) -> Self {
        Self {
            monitoring_interval: config.monitoring_interval(),
            save_interval: config.rl.save_interval,
            initial_connections: config.streams.default_streams,
            agent: AgentConfig {
                learning_rate: config.rl.learning_rate,
                discount_factor: config.rl.discount_factor,
                exploration_rate: config.rl.exploration_rate,
                min_exploration: config.rl.min_exploration,
                exploration_decay: config.rl.exploration_decay,
                min_connections: config.streams.min_streams,
                max_connections: config.streams.max_streams,
            },
        }
    }
}

/// Statistics snapshot exposed to callers
#[derive(Debug, Clone, Serialize)]
pub struct RlStats {
    pub q_table_size: usize,
    pub current_connections: usize,
    pub exploration_rate: f64,
    pub total_decisions: u64,
    pub total_learning_updates: u64,
    pub average_reward: f64,
    pub total_reward: f64,
    pub successful_adjustments: u64,
    pub positive_rewards: u64,
    pub negative_rewards: u64,
    pub stream_efficiency: f64,
    pub optimal_range_percentage: f64,
    pub metrics_history_size: usize,
    pub monitoring_interval_secs: f64,
}

/// Q-learning connection controller
pub struct RlController {
    config: ControllerConfig,
    agent: QLearningAgent,
    store: Option<QTableStore>,
    desired: Arc<AtomicUsize>,
    last_decision: Option<Instant>,
    previous: Option<(StateKey, usize, MetricSample)>,
    metrics_history: VecDeque<MetricSample>,
    transitions: VecDeque<Transition>,
    total_decisions: u64,
    total_updates: u64,
    total_reward: f64,
    positive_rewards: u64,
    negative_rewards: u64,
    successful_adjustments: u64,
    band_decisions: u64,
    last_throughput: f64,
}

impl std::fmt::Debug for RlController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RlController")
            .field("connections", &self.current_connections())
            .field("decisions", &self.total_decisions)
            .field("updates", &self.total_updates)
            .finish()
    }
}

impl RlController {
    /// In-memory controller with no persistence
    pub fn new(config: ControllerConfig) -> Self {
        let agent = QLearningAgent::new(config.agent.clone());
        Self::build(config, None, agent)
    }

    /// Controller persisting to (and restoring from) the given store
    pub fn with_store(config: ControllerConfig, store: QTableStore) -> Result<Self> {
        let agent = QLearningAgent::new(config.agent.clone());
        let mut controller = Self::build(config, Some(store), agent);
        controller.restore()?;
        Ok(controller)
    }

    /// Deterministic controller for tests and simulations
    pub fn with_seed(config: ControllerConfig, seed: u64) -> Self {
        let agent = QLearningAgent::with_seed(config.agent.clone(), seed);
        Self::build(config, None, agent)
    }

    /// Deterministic controller with persistence, for round-trip tests
    pub fn with_seed_and_store(
        config: ControllerConfig,
        seed: u64,
        store: QTableStore,
    ) -> Result<Self> {
        let agent = QLearningAgent::with_seed(config.agent.clone(), seed);
        let mut controller = Self::build(config, Some(store), agent);
        controller.restore()?;
        Ok(controller)
    }

    fn build(config: ControllerConfig, store: Option<QTableStore>, agent: QLearningAgent) -> Self {
        let initial = config
            .initial_connections
            .clamp(config.agent.min_connections, config.agent.max_connections);
        Self {
            config,
            agent,
            store,
            desired: Arc::new(AtomicUsize::new(initial)),
            last_decision: None,
            previous: None,
            metrics_history: VecDeque::with_capacity(RL_HISTORY_LIMIT),
            transitions: VecDeque::with_capacity(RL_HISTORY_LIMIT),
            total_decisions: 0,
            total_updates: 0,
            total_reward: 0.0,
            positive_rewards: 0,
            negative_rewards: 0,
            successful_adjustments: 0,
            band_decisions: 0,
            last_throughput: 0.0,
        }
    }

    /// Shared handle the coordinator polls for the desired pool size
    pub fn desired_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.desired)
    }

    /// Current desired connection count
    pub fn current_connections(&self) -> usize {
        self.desired.load(Ordering::Relaxed)
    }

    /// Override the desired count, e.g. to seed a job's requested streams
    pub fn set_connections(&self, connections: usize) {
        let clamped = connections.clamp(
            self.config.agent.min_connections,
            self.config.agent.max_connections,
        );
        self.desired.store(clamped, Ordering::Relaxed);
    }

    /// Whether a full monitoring interval has passed since the last decision
    pub fn should_decide(&self) -> bool {
        match self.last_decision {
            None => true,
            Some(at) => at.elapsed() >= self.config.monitoring_interval,
        }
    }

    /// Run one controller cycle on a fresh sample. Returns the (possibly
    /// unchanged) connection count; calls inside the monitoring interval
    /// change nothing.
    pub fn make_decision(&mut self, sample: MetricSample) -> usize {
        if !self.should_decide() {
            return self.current_connections();
        }

        let connections = self.current_connections();
        let next_state = discretize(sample.throughput_mbps, sample.rtt_ms, sample.loss_pct);

        // Learn from the previous action before acting again
        if let Some((prev_state, prev_action, prev_sample)) = self.previous.take() {
            let step_reward = reward(
                prev_sample.throughput_mbps,
                sample.throughput_mbps,
                prev_sample.loss_pct,
                sample.loss_pct,
                connections,
            );
            self.agent
                .update(prev_state, prev_action, step_reward, next_state);
            self.record_learning(prev_state, prev_action, step_reward, next_state, connections);
        }

        self.metrics_history.push_back(sample.clone());
        while self.metrics_history.len() > RL_HISTORY_LIMIT {
            self.metrics_history.pop_front();
        }
        self.last_throughput = sample.throughput_mbps;

        let action = self.agent.choose_action(next_state);
        let recent: Vec<MetricSample> = self.metrics_history.iter().cloned().collect();
        let new_connections = self.agent.apply_constraints(action, connections, &recent);

        self.desired.store(new_connections, Ordering::Relaxed);
        self.last_decision = Some(Instant::now());
        self.total_decisions += 1;
        if new_connections != connections {
            self.successful_adjustments += 1;
        }
        if (OPTIMAL_BAND.0..=OPTIMAL_BAND.1).contains(&new_connections) {
            self.band_decisions += 1;
        }

        debug!(
            "RL decision #{}: T={:.1}Mbps RTT={:.0}ms loss={:.2}% state={:?} action={} ({:+}) connections {} -> {} eps={:.4}",
            self.total_decisions,
            sample.throughput_mbps,
            sample.rtt_ms,
            sample.loss_pct,
            next_state,
            action,
            ACTION_DELTAS[action],
            connections,
            new_connections,
            self.agent.exploration_rate(),
        );

        self.previous = Some((next_state, action, sample));
        new_connections
    }

    fn record_learning(
        &mut self,
        state: StateKey,
        action: usize,
        step_reward: f64,
        next_state: StateKey,
        connections: usize,
    ) {
        self.total_updates += 1;
        self.total_reward += step_reward;
        if step_reward > 0.0 {
            self.positive_rewards += 1;
        } else if step_reward < 0.0 {
            self.negative_rewards += 1;
        }

        self.transitions.push_back(Transition {
            state: format_state_key(state),
            action,
            reward: step_reward,
            next_state: format_state_key(next_state),
            connections,
            timestamp: chrono::Utc::now(),
        });
        while self.transitions.len() > RL_HISTORY_LIMIT {
            self.transitions.pop_front();
        }

        if self.config.save_interval > 0 && self.total_updates % self.config.save_interval == 0 {
            if let Err(e) = self.save() {
                warn!("Periodic Q-table save failed: {}", e);
            }
        }
    }

    /// Persist the Q-table now, if a store is configured
    pub fn save(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store.save(self.agent.table(), &self.meta())
    }

    /// Restore table and counters from the store
    fn restore(&mut self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        match store.load() {
            Ok((table, meta)) => {
                self.agent.set_table(table);
                self.agent.set_exploration_rate(meta.exploration_rate);
                self.total_decisions = meta.total_decisions;
                self.total_updates = meta.total_updates;
                if !self.agent.table().is_empty() {
                    info!(
                        "Restored Q-table: {} states, {} prior decisions",
                        self.agent.table().len(),
                        self.total_decisions
                    );
                }
                Ok(())
            }
            Err(e) => {
                // A corrupt table is not fatal; learning restarts clean
                warn!("Could not load Q-table, starting empty: {}", e);
                Ok(())
            }
        }
    }

    fn meta(&self) -> QTableMeta {
        QTableMeta {
            total_states: self.agent.table().len(),
            total_decisions: self.total_decisions,
            total_updates: self.total_updates,
            exploration_rate: self.agent.exploration_rate(),
            timestamp: 0,
        }
    }

    /// Clear all learning and persist the empty table
    pub fn reset(&mut self) -> Result<()> {
        self.agent.reset();
        self.previous = None;
        self.metrics_history.clear();
        self.transitions.clear();
        self.total_decisions = 0;
        self.total_updates = 0;
        self.total_reward = 0.0;
        self.positive_rewards = 0;
        self.negative_rewards = 0;
        self.successful_adjustments = 0;
        self.band_decisions = 0;
        self.save()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> RlStats {
        let connections = self.current_connections();
        RlStats {
            q_table_size: self.agent.table().len(),
            current_connections: connections,
            exploration_rate: self.agent.exploration_rate(),
            total_decisions: self.total_decisions,
            total_learning_updates: self.total_updates,
            average_reward: if self.total_updates > 0 {
                self.total_reward / self.total_updates as f64
            } else {
                0.0
            },
            total_reward: self.total_reward,
            successful_adjustments: self.successful_adjustments,
            positive_rewards: self.positive_rewards,
            negative_rewards: self.negative_rewards,
            stream_efficiency: if connections > 0 {
                self.last_throughput / connections as f64
            } else {
                0.0
            },
            optimal_range_percentage: if self.total_decisions > 0 {
                self.band_decisions as f64 / self.total_decisions as f64 * 100.0
            } else {
                0.0
            },
            metrics_history_size: self.metrics_history.len(),
            monitoring_interval_secs: self.config.monitoring_interval.as_secs_f64(),
        }
    }

    /// Recent transitions, oldest first
    pub fn transitions(&self) -> Vec<Transition> {
        self.transitions.iter().cloned().collect()
    }

    /// Access the agent's Q-table (stats and tests)
    pub fn q_table(&self) -> &crate::qtable::QTable {
        self.agent.table()
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

    fn fast_config() -> ControllerConfig {
        ControllerConfig {
            monitoring_interval: Duration::ZERO,
            save_interval: 0,
            initial_connections: 8,
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn test_initial_connections_clamped() {
        let config = ControllerConfig {
            initial_connections: 64,
            ..ControllerConfig::default()
        };
        let controller = RlController::with_seed(config, 3);
        assert_eq!(controller.current_connections(), 16);
    }

    #[test]
    fn test_decision_inside_interval_is_noop() {
        let config = ControllerConfig {
            monitoring_interval: Duration::from_secs(3600),
            ..ControllerConfig::default()
        };
        let mut controller = RlController::with_seed(config, 3);

        let first = controller.make_decision(sample(20.0, 50.0, 0.2));
        assert_eq!(controller.stats().total_decisions, 1);

        // Second call lands inside the interval: same count, no decision
        let second = controller.make_decision(sample(60.0, 10.0, 0.1));
        assert_eq!(second, first);
        assert_eq!(controller.stats().total_decisions, 1);
    }

    #[test]
    fn test_learning_starts_on_second_decision() {
        let mut controller = RlController::with_seed(fast_config(), 3);

        controller.make_decision(sample(20.0, 50.0, 0.2));
        assert_eq!(controller.stats().total_learning_updates, 0);

        controller.make_decision(sample(25.0, 50.0, 0.2));
        assert_eq!(controller.stats().total_learning_updates, 1);
        assert_eq!(controller.transitions().len(), 1);
    }

    #[test]
    fn test_connections_stay_in_bounds() {
        let mut controller = RlController::with_seed(fast_config(), 11);
        for i in 0..200 {
            let n = controller.make_decision(sample(
                10.0 + (i % 5) as f64 * 8.0,
                40.0 + (i % 7) as f64 * 30.0,
                0.1 + (i % 4) as f64 * 0.8,
            ));
            assert!((1..=16).contains(&n));
        }
    }
}
