//! # TrafficGuru
//!
//! A four-way intersection controller modelled as an operating-system
//! scheduling problem.
//!
//! Each approach lane (North, South, East, West) behaves like a process with a
//! bounded queue of vehicles and a WAITING / READY / RUNNING / BLOCKED state
//! machine. A scheduler picks which lane holds the intersection using a
//! pluggable policy, context switches between lanes, and guarantees that at
//! most one lane is RUNNING. The four quadrants of the crossing are allocated
//! with the Banker's safety check, a wait-for graph detector breaks any cycle
//! that still forms, and emergency vehicles preempt the current lane.
//!
//! ## Policies
//!
//! - **SJF / SRTF**: shortest queue first, non-preemptive or preemptive
//! - **Aging / Weighted / Predictive SJF**: queue cost adjusted by wait, priority
//!   or observed service
//! - **Multilevel feedback**: lanes sink a level per quantum and age back up
//! - **Priority round-robin**: static priority, rotating within a priority
//!
//! ## Running a simulation
//!
//! ```rust,no_run
//! use trafficguru::config::SimulationConfig;
//! use trafficguru::runtime::{Command, SimulationHandle};
//! use trafficguru::policy::PolicyId;
//!
//! # fn main() -> trafficguru::core::AppResult<()> {
//! let config = SimulationConfig::from_env()?;
//! trafficguru::util::init_tracing(config.debug);
//!
//! let handle = SimulationHandle::launch(config)?;
//! handle.send(Command::SetPolicy { policy: PolicyId::MultilevelFeedback });
//! let report = handle.wait();
//! std::process::exit(report.exit_code());
//! # }
//! ```
//!
//! ## Stepping by hand
//!
//! Tests and tools can drive an [`runtime::Intersection`] directly with
//! [`runtime::Intersection::step`], one scheduling pass at a time, without
//! starting any threads.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Intersection model: lanes, scheduler, allocator, deadlock and emergency handling.
pub mod core;
/// Scheduling policies behind one trait.
pub mod policy;
/// Startup configuration.
pub mod config;
/// Builders to construct an intersection from configuration.
pub mod builders;
/// Shared context, thread loops, commands and status observation.
pub mod runtime;
/// Shared utilities.
pub mod util;
