//! Component-level tests run through the public API.

mod unit;
