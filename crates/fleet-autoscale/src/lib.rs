//! fleet-autoscale: breach-driven fleet decisions.
//!
//! [`decide`] is a pure function of (samples, fleet, policy). It performs
//! no I/O and reads no clock, so identical inputs give identical actions.
//!
//! # Decision Algorithm
//!
//! ```text
//! candidates = samples with a valid reading for a managed instance
//! breaches   = candidates where percent_busy >= threshold   (input order)
//! acted      = first instances_per_breach_batch breaches; the rest defer
//! budget     = max_fleet_size - total_ever_launched
//!
//! Replace:  for each acted breach
//!               budget > 0  → Replace{target}, budget -= 1
//!               budget == 0 → no action, cap_reached
//! ScaleOut: count = min(len(acted), budget)
//!               count > 0   → ScaleOut{count}
//!               count < len(acted) → cap_reached
//! ```

pub mod engine;

pub use engine::{decide, decide_replace, decide_scale_out, Decision};
