//! Notification text for a tick's actions.

use fleet_core::{Action, ActionResult, FleetState, Policy};

pub const SUBJECT: &str = "High CPU utilization: fleet updated";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub subject: String,
    pub body: String,
}

impl Summary {
    /// One message covering every result of the tick. `now` is unix seconds.
    pub fn build(results: &[ActionResult], fleet: &FleetState, policy: &Policy, now: u64) -> Self {
        let mut body = String::new();

        for result in results {
            let new_ids = if result.new_instance_ids.is_empty() {
                "none".to_string()
            } else {
                result.new_instance_ids.join(", ")
            };
            match &result.action {
                Action::Replace { target } => {
                    let stopped = if result.terminated.is_some() {
                        "has been stopped"
                    } else {
                        "could not be stopped"
                    };
                    body.push_str(&format!(
                        "Instance {target} exceeded the CPU threshold ({}%) and {stopped}.\n",
                        policy.threshold
                    ));
                    body.push_str(&format!("New instance(s) launched: {new_ids}\n"));
                }
                Action::ScaleOut { count } => {
                    body.push_str(&format!(
                        "CPU threshold ({}%) exceeded; scaling out by {count}.\n",
                        policy.threshold
                    ));
                    body.push_str(&format!("New instance(s) launched: {new_ids}\n"));
                }
            }
            if !result.unready_ids.is_empty() {
                body.push_str(&format!(
                    "Created but never ready: {}\n",
                    result.unready_ids.join(", ")
                ));
            }
            if result.unaccounted_launches > 0 {
                body.push_str(&format!(
                    "Launches with unknown outcome: {}\n",
                    result.unaccounted_launches
                ));
            }
            for error in &result.errors {
                body.push_str(&format!("  error: {error}\n"));
            }
            body.push('\n');
        }

        body.push_str(&format!(
            "Fleet size: {} (launched {} of {})\n",
            fleet.len(),
            fleet.total_ever_launched(),
            policy.max_fleet_size
        ));
        body.push_str(&format!("Time: {}", format_timestamp(now)));

        Self {
            subject: SUBJECT.to_string(),
            body,
        }
    }
}

pub fn format_timestamp(timestamp_secs: u64) -> String {
    chrono::DateTime::from_timestamp(timestamp_secs as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_summary_lists_old_and_new() {
        let mut result = ActionResult::new(Action::Replace {
            target: "A".to_string(),
        });
        result.terminated = Some("A".to_string());
        result.new_instance_ids = vec!["C".to_string()];
        let fleet = FleetState::new(["B", "C"], 3);

        let s = Summary::build(&[result], &fleet, &Policy::new(30.0, 5, 1), 0);
        assert_eq!(s.subject, SUBJECT);
        assert!(s.body.contains("Instance A exceeded the CPU threshold (30%) and has been stopped."));
        assert!(s.body.contains("New instance(s) launched: C"));
        assert!(s.body.contains("Fleet size: 2 (launched 3 of 5)"));
        assert!(s.body.ends_with("Time: 1970-01-01 00:00:00 UTC"));
    }

    #[test]
    fn failures_are_reported() {
        let mut result = ActionResult::new(Action::Replace {
            target: "A".to_string(),
        });
        result.errors.push("terminate A: backend down".to_string());
        result.errors.push("launch: quota".to_string());
        let fleet = FleetState::new(["A", "B"], 2);

        let s = Summary::build(&[result], &fleet, &Policy::new(30.0, 5, 1), 0);
        assert!(s.body.contains("could not be stopped"));
        assert!(s.body.contains("New instance(s) launched: none"));
        assert!(s.body.contains("  error: terminate A: backend down"));
        assert!(s.body.contains("  error: launch: quota"));
    }

    #[test]
    fn scale_out_summary() {
        let mut result = ActionResult::new(Action::ScaleOut { count: 2 });
        result.new_instance_ids = vec!["C".to_string(), "D".to_string()];
        let fleet = FleetState::new(["A", "B", "C", "D"], 4);

        let s = Summary::build(&[result], &fleet, &Policy::new(30.0, 5, 2), 0);
        assert!(s.body.contains("scaling out by 2"));
        assert!(s.body.contains("New instance(s) launched: C, D"));
    }

    #[test]
    fn unready_instances_are_listed() {
        let mut result = ActionResult::new(Action::ScaleOut { count: 2 });
        result.unready_ids = vec!["X".to_string()];
        result.unaccounted_launches = 1;
        let fleet = FleetState::new(["A", "B"], 4);

        let s = Summary::build(&[result], &fleet, &Policy::new(30.0, 5, 2), 0);
        assert!(s.body.contains("New instance(s) launched: none"));
        assert!(s.body.contains("Created but never ready: X"));
        assert!(s.body.contains("Launches with unknown outcome: 1"));
        assert!(s.body.contains("Fleet size: 2 (launched 4 of 5)"));
    }

    #[test]
    fn timestamp_format() {
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20 UTC");
    }
}
