//! Bounded FIFO of vehicles waiting on one lane.
//!
//! The queue has no concurrency of its own; its owning lane guards it.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::core::TrafficError;

/// Vehicle identifier, unique for the lifetime of a simulation.
pub type VehicleId = u64;

/// A queued vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    /// Vehicle identifier.
    pub id: VehicleId,
    /// Arrival timestamp in milliseconds since epoch.
    pub arrived_at_ms: u128,
    /// Whether this vehicle is an emergency vehicle.
    pub emergency: bool,
}

impl Vehicle {
    /// Regular vehicle arriving at `arrived_at_ms`.
    #[must_use]
    pub const fn new(id: VehicleId, arrived_at_ms: u128) -> Self {
        Self {
            id,
            arrived_at_ms,
            emergency: false,
        }
    }

    /// Emergency vehicle arriving at `arrived_at_ms`.
    #[must_use]
    pub const fn emergency(id: VehicleId, arrived_at_ms: u128) -> Self {
        Self {
            id,
            arrived_at_ms,
            emergency: true,
        }
    }
}

/// Capacity-bounded FIFO. Invariant: `len() <= capacity()`.
#[derive(Debug, Clone)]
pub struct VehicleQueue {
    capacity: usize,
    vehicles: VecDeque<Vehicle>,
}

impl VehicleQueue {
    /// Create an empty queue holding at most `capacity` vehicles.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            vehicles: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Append a vehicle at the tail.
    ///
    /// # Errors
    ///
    /// `TrafficError::QueueFull` when the queue is at capacity.
    pub fn enqueue(&mut self, vehicle: Vehicle) -> Result<(), TrafficError> {
        if self.is_full() {
            return Err(TrafficError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.vehicles.push_back(vehicle);
        Ok(())
    }

    /// Remove the vehicle at the head.
    ///
    /// # Errors
    ///
    /// `TrafficError::QueueEmpty` when there is nothing to remove.
    pub fn dequeue(&mut self) -> Result<Vehicle, TrafficError> {
        self.vehicles.pop_front().ok_or(TrafficError::QueueEmpty)
    }

    /// Vehicle at the head without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&Vehicle> {
        self.vehicles.front()
    }

    /// Current number of queued vehicles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Whether the queue is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.vehicles.len() >= self.capacity
    }

    /// Maximum number of vehicles.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether an emergency vehicle is waiting.
    #[must_use]
    pub fn has_emergency(&self) -> bool {
        self.vehicles.iter().any(|v| v.emergency)
    }
}
