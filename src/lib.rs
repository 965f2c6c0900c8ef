#![cfg_attr(not(test), no_std)]

//! A single-connection BLE peripheral that logs writes, serves a fixed read
//! value and answers a notification subscription with a timed burst of
//! random packets.
//!
//! The crate is independent of the BLE stack it runs on: the stack is reached
//! through [`bootstrap::BleStack`] and [`burst::Notifier`], and its events are
//! fed into [`peripheral::Peripheral`].

pub mod access;
pub mod advertising;
pub mod bootstrap;
pub mod burst;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod peripheral;
pub mod service;

pub use error::{AttError, Error};
