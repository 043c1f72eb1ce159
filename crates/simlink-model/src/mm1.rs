//! Single-server queue with exponential arrivals and service.
//!
//! Parameters: `iat` (mean inter-arrival time), `servicetime` (mean service
//! time), `seed` (random seed; random stream 1 of the run control overrides
//! it). Statistics, measured after warmup and combined over replications:
//!
//! | name      | value |
//! |-----------|-------|
//! | `qN.max`  | largest queue length (waiting customers) |
//! | `qN.mean` | time-averaged queue length |
//! | `served`  | customers that completed service |
//! | `dN.mean` | mean wait before service |
//! | `uN.mean` | server utilization |

use std::collections::VecDeque;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use simlink_proto::{RunControl, Value};

use crate::model::{ModelError, SimulationModel};

/// Random stream whose seed overrides the `seed` parameter.
pub const SEED_STREAM: i32 = 1;

const DEFAULT_SEED: u64 = 1;

/// Statistic names.
pub const STATISTICS: [&str; 5] = ["qN.max", "qN.mean", "served", "dN.mean", "uN.mean"];

/// Results of one or more replications.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QueueStatistics {
    /// Largest queue length
    pub max_queue: u32,
    /// Time-averaged queue length
    pub mean_queue: f64,
    /// Completed services
    pub served: u64,
    /// Mean wait before service
    pub mean_delay: f64,
    /// Fraction of time the server was busy
    pub utilization: f64,
}

/// M/M/1 queue model.
#[derive(Debug, Clone, Default)]
pub struct Mm1Model {
    mean_interarrival: Option<f64>,
    mean_service: Option<f64>,
    seed: Option<u64>,
    results: Option<QueueStatistics>,
}

impl Mm1Model {
    /// Model with no parameters set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Results of the last run.
    pub fn results(&self) -> Option<QueueStatistics> {
        self.results
    }
}

impl SimulationModel for Mm1Model {
    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<(), ModelError> {
        let invalid = |reason: &str| ModelError::InvalidParameter {
            name: name.to_string(),
            reason: format!("{reason}, got {value}"),
        };
        match name {
            "iat" | "servicetime" => {
                let mean = value.as_f64().ok_or_else(|| invalid("expected a number"))?;
                if !(mean.is_finite() && mean > 0.0) {
                    return Err(invalid("expected a positive mean"));
                }
                if name == "iat" {
                    self.mean_interarrival = Some(mean);
                } else {
                    self.mean_service = Some(mean);
                }
            },
            "seed" => {
                let seed = value.as_i64().ok_or_else(|| invalid("expected an integer"))?;
                self.seed = Some(seed as u64);
            },
            other => return Err(ModelError::UnknownParameter(other.to_string())),
        }
        Ok(())
    }

    fn run(&mut self, control: &RunControl) -> Result<(), ModelError> {
        let interarrival = self.mean_interarrival.ok_or_else(|| missing("iat"))?;
        let service = self.mean_service.ok_or_else(|| missing("servicetime"))?;
        let warmup = control.warmup_duration.as_seconds();
        let length = control.run_duration.as_seconds();
        if !(warmup >= 0.0 && length >= 0.0) {
            return Err(ModelError::InvalidRunControl(format!(
                "durations must be non-negative, got run {length} and warmup {warmup}"
            )));
        }

        let seed = control
            .streams
            .get(&SEED_STREAM)
            .map(|s| *s as u64)
            .or(self.seed)
            .unwrap_or(DEFAULT_SEED);
        let replications = control.number_replications.max(1) as u64;

        let mut combined = QueueStatistics::default();
        for replication in 0..replications {
            let mut queue = Replication::new(seed.wrapping_add(replication), interarrival, service);
            let stats = queue.run(warmup, length);
            combined.max_queue = combined.max_queue.max(stats.max_queue);
            combined.mean_queue += stats.mean_queue;
            combined.served += stats.served;
            combined.mean_delay += stats.mean_delay;
            combined.utilization += stats.utilization;
        }
        let n = replications as f64;
        combined.mean_queue /= n;
        combined.mean_delay /= n;
        combined.utilization /= n;

        tracing::debug!(replications, served = combined.served, "M/M/1 run complete");
        self.results = Some(combined);
        Ok(())
    }

    fn statistic(&self, name: &str) -> Result<Value, ModelError> {
        let results = self.results.ok_or_else(|| ModelError::Failed("no completed run".to_string()))?;
        match name {
            "qN.max" => Ok(Value::Int32(results.max_queue as i32)),
            "qN.mean" => Ok(Value::Float64(results.mean_queue)),
            "served" => Ok(Value::Int64(results.served as i64)),
            "dN.mean" => Ok(Value::Float64(results.mean_delay)),
            "uN.mean" => Ok(Value::Float64(results.utilization)),
            other => Err(ModelError::UnknownStatistic(other.to_string())),
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

fn missing(name: &str) -> ModelError {
    ModelError::InvalidParameter { name: name.to_string(), reason: "not set".to_string() }
}

/// One replication's event loop.
struct Replication {
    rng: ChaCha8Rng,
    interarrival: f64,
    service: f64,

    now: f64,
    waiting: VecDeque<f64>,
    busy: bool,

    // Accumulated after warmup
    queue_area: f64,
    busy_area: f64,
    delay_total: f64,
    delays: u64,
    served: u64,
    max_queue: usize,
}

impl Replication {
    fn new(seed: u64, interarrival: f64, service: f64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            interarrival,
            service,
            now: 0.0,
            waiting: VecDeque::new(),
            busy: false,
            queue_area: 0.0,
            busy_area: 0.0,
            delay_total: 0.0,
            delays: 0,
            served: 0,
            max_queue: 0,
        }
    }

    /// Exponential sample with the given mean.
    fn sample(&mut self, mean: f64) -> f64 {
        let u: f64 = self.rng.r#gen();
        -mean * (1.0 - u).ln()
    }

    fn run(&mut self, warmup: f64, length: f64) -> QueueStatistics {
        let end = warmup + length;
        let mut next_arrival = self.sample(self.interarrival);
        let mut next_departure = f64::INFINITY;

        loop {
            let next = next_arrival.min(next_departure);
            if next > end {
                self.advance(end, warmup);
                break;
            }
            self.advance(next, warmup);
            let measuring = self.now >= warmup;

            if next_arrival <= next_departure {
                if self.busy {
                    self.waiting.push_back(self.now);
                } else {
                    self.busy = true;
                    self.record_delay(0.0, measuring);
                    next_departure = self.now + self.sample(self.service);
                }
                next_arrival = self.now + self.sample(self.interarrival);
            } else {
                if measuring {
                    self.served += 1;
                }
                if let Some(arrived) = self.waiting.pop_front() {
                    self.record_delay(self.now - arrived, measuring);
                    next_departure = self.now + self.sample(self.service);
                } else {
                    self.busy = false;
                    next_departure = f64::INFINITY;
                }
            }

            if measuring {
                self.max_queue = self.max_queue.max(self.waiting.len());
            }
        }

        let per_time = |area: f64| if length > 0.0 { area / length } else { 0.0 };
        QueueStatistics {
            max_queue: self.max_queue as u32,
            mean_queue: per_time(self.queue_area),
            served: self.served,
            mean_delay: if self.delays > 0 { self.delay_total / self.delays as f64 } else { 0.0 },
            utilization: per_time(self.busy_area),
        }
    }

    /// Move the clock, integrating queue length and busy time after warmup.
    fn advance(&mut self, to: f64, warmup: f64) {
        let from = self.now.max(warmup);
        if to > from {
            let span = to - from;
            self.queue_area += self.waiting.len() as f64 * span;
            if self.busy {
                self.busy_area += span;
            }
        }
        self.now = to;
    }

    fn record_delay(&mut self, delay: f64, measuring: bool) {
        if measuring {
            self.delay_total += delay;
            self.delays += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use simlink_proto::SimTime;

    use super::*;

    fn configured(seed: i32) -> Mm1Model {
        let mut model = Mm1Model::new();
        model.set_parameter("iat", &Value::Float64(1.0)).unwrap();
        model.set_parameter("servicetime", &Value::Float64(0.85)).unwrap();
        model.set_parameter("seed", &Value::Int32(seed)).unwrap();
        model
    }

    fn control(length: f64) -> RunControl {
        RunControl::new(SimTime::seconds(length), SimTime::seconds(0.0))
    }

    #[test]
    fn same_seed_same_results() {
        let mut a = configured(42);
        let mut b = configured(42);
        a.run(&control(100.0)).unwrap();
        b.run(&control(100.0)).unwrap();

        assert_eq!(a.results(), b.results());
        assert!(a.results().unwrap().served > 0);
    }

    #[test]
    fn long_run_approaches_theory() {
        // rho = 0.85: utilization 0.85, mean queue rho^2 / (1 - rho) ~ 4.8
        let mut model = configured(7);
        model.run(&control(200_000.0)).unwrap();
        let stats = model.results().unwrap();

        assert!((stats.utilization - 0.85).abs() < 0.03, "{stats:?}");
        assert!((stats.mean_queue - 4.82).abs() < 1.5, "{stats:?}");
    }

    #[test]
    fn statistics_by_name() {
        let mut model = configured(42);
        model.run(&control(100.0)).unwrap();

        for name in STATISTICS {
            assert!(model.statistic(name).is_ok(), "{name}");
        }
        assert_eq!(model.statistic("zzz"), Err(ModelError::UnknownStatistic("zzz".to_string())));
    }

    #[test]
    fn run_requires_parameters() {
        let mut model = Mm1Model::new();
        let result = model.run(&control(10.0));
        assert!(matches!(result, Err(ModelError::InvalidParameter { name, .. }) if name == "iat"));
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut model = Mm1Model::new();
        assert!(model.set_parameter("iat", &Value::from("fast")).is_err());
        assert!(model.set_parameter("servicetime", &Value::Float64(-1.0)).is_err());
        assert_eq!(
            model.set_parameter("lambda", &Value::Float64(1.0)),
            Err(ModelError::UnknownParameter("lambda".to_string()))
        );
    }

    #[test]
    fn warmup_excluded() {
        let mut with_warmup = configured(3);
        with_warmup
            .run(&RunControl::new(SimTime::seconds(50.0), SimTime::seconds(1_000.0)))
            .unwrap();
        let mut without = configured(3);
        without.run(&control(50.0)).unwrap();

        assert_ne!(with_warmup.results(), without.results());
    }

    #[test]
    fn reset_clears_results() {
        let mut model = configured(1);
        model.run(&control(10.0)).unwrap();
        model.reset();
        assert!(model.results().is_none());
        assert!(model.statistic("served").is_err());
    }
}
