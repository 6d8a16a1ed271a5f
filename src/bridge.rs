//! Parameter bridge between page controls and the device.
//!
//! This module provides the layer that lets UI code write parameters and
//! send messages without caring whether the device exists yet.
//!
//! # Architecture
//!
//! - **Outbound**: [`Command`]s are applied to the device immediately, or
//!   queued while it is absent. Queued commands to the same target coalesce,
//!   so the most recent value always wins.
//! - **Retry**: a timer calls [`ParameterBridge::retry_tick`] every
//!   [`RetryPolicy::interval_ms`]. Commands still undeliverable after
//!   [`RetryPolicy::max_attempts`] ticks are dropped and logged.
//! - **Inbound**: [`DeviceEvent`]s are fanned out to subscribers via
//!   [`ParameterBridge::dispatch`].
//!
//! # Usage
//!
//! ```ignore
//! let mut bridge = ParameterBridge::new(RetryPolicy::default());
//!
//! // Before the device exists: deferred
//! bridge.set_parameter(session.device_mut(), "rotary1", 0.42)?;
//!
//! // Once the session is active
//! bridge.flush(session.device_mut());
//! ```

use crate::device::{Device, DeviceEvent};
use crate::error::{DeckError, DeckResult};
use crate::state::Command;

/// Subscriber for device-originated parameter changes.
pub type ParameterCallback = Box<dyn FnMut(&str, f64)>;

/// Subscriber for device-originated tagged messages.
pub type MessageCallback = Box<dyn FnMut(&str, &[f64])>;

/// How deferred commands are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between retry ticks.
    pub interval_ms: u32,
    /// Ticks a command may wait before it is dropped.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_attempts: 30,
        }
    }
}

/// Outcome of a bridge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The device received the command.
    Delivered,
    /// The device does not exist yet; the command is queued.
    Deferred,
}

#[derive(Debug)]
struct PendingCommand {
    command: Command,
    attempts: u32,
}

/// Routes commands to the device and device events to subscribers.
pub struct ParameterBridge {
    policy: RetryPolicy,

    /// FIFO of commands waiting for the device.
    pending: Vec<PendingCommand>,

    parameter_subscribers: Vec<ParameterCallback>,
    message_subscribers: Vec<MessageCallback>,
}

impl ParameterBridge {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            pending: Vec::new(),
            parameter_subscribers: Vec::new(),
            message_subscribers: Vec::new(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Outbound
    // ═══════════════════════════════════════════════════════════════════

    /// Write a device parameter, deferring while the device is absent.
    pub fn set_parameter<D: Device>(
        &mut self,
        device: Option<&mut D>,
        name: &str,
        value: f64,
    ) -> DeckResult<Delivery> {
        self.submit(
            device,
            Command::SetParameter {
                name: name.to_string(),
                value,
            },
        )
    }

    /// Send a tagged message, deferring while the device is absent.
    pub fn send_message<D: Device>(
        &mut self,
        device: Option<&mut D>,
        tag: &str,
        payload: Vec<f64>,
    ) -> DeckResult<Delivery> {
        self.submit(
            device,
            Command::SendMessage {
                tag: tag.to_string(),
                payload,
            },
        )
    }

    /// Apply a command now or queue it.
    pub fn submit<D: Device>(
        &mut self,
        device: Option<&mut D>,
        command: Command,
    ) -> DeckResult<Delivery> {
        match device {
            Some(device) => {
                command.apply(device)?;
                log::trace!("{}", command.label());
                Ok(Delivery::Delivered)
            }
            None => {
                log::debug!("device unavailable, deferring {}", command.label());
                self.defer(command);
                Ok(Delivery::Deferred)
            }
        }
    }

    fn defer(&mut self, command: Command) {
        if let Some(existing) = self
            .pending
            .iter_mut()
            .find(|p| p.command.same_target(&command))
        {
            existing.command = command;
            existing.attempts = 0;
        } else {
            self.pending.push(PendingCommand {
                command,
                attempts: 0,
            });
        }
    }

    /// Deliver every queued command in order. Returns how many were
    /// delivered; failures are logged and dropped.
    pub fn flush<D: Device>(&mut self, device: Option<&mut D>) -> usize {
        let Some(device) = device else {
            return 0;
        };

        let mut delivered = 0;
        for pending in self.pending.drain(..) {
            match pending.command.apply(&mut *device) {
                Ok(()) => delivered += 1,
                Err(e) => log::warn!("dropping deferred {}: {e}", pending.command.label()),
            }
        }
        if delivered > 0 {
            log::debug!("delivered {delivered} deferred commands");
        }
        delivered
    }

    /// Called every `interval_ms`.
    ///
    /// With a device this is a flush. Without one, every queued command
    /// spends an attempt and those over budget are dropped.
    pub fn retry_tick<D: Device>(&mut self, device: Option<&mut D>) -> usize {
        if device.is_some() {
            return self.flush(device);
        }

        let max_attempts = self.policy.max_attempts;
        self.pending.retain_mut(|pending| {
            pending.attempts += 1;
            if pending.attempts > max_attempts {
                let error = DeckError::RetriesExhausted {
                    operation: pending.command.label(),
                    attempts: max_attempts,
                };
                log::error!("{error}");
                false
            } else {
                true
            }
        });
        0
    }

    /// Drop all queued commands (page teardown).
    pub fn cancel_pending(&mut self) {
        if !self.pending.is_empty() {
            log::debug!("cancelling {} deferred commands", self.pending.len());
        }
        self.pending.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Inbound
    // ═══════════════════════════════════════════════════════════════════

    /// Register a subscriber for every parameter change the device emits,
    /// including ones that did not originate from the page.
    pub fn on_device_parameter_change(&mut self, callback: impl FnMut(&str, f64) + 'static) {
        self.parameter_subscribers.push(Box::new(callback));
    }

    pub fn on_device_message(&mut self, callback: impl FnMut(&str, &[f64]) + 'static) {
        self.message_subscribers.push(Box::new(callback));
    }

    pub fn dispatch(&mut self, event: &DeviceEvent) {
        match event {
            DeviceEvent::ParameterChanged { name, value } => {
                for subscriber in &mut self.parameter_subscribers {
                    subscriber(name, *value);
                }
            }
            DeviceEvent::Message { tag, payload } => {
                for subscriber in &mut self.message_subscribers {
                    subscriber(tag, payload);
                }
            }
        }
    }
}

impl Default for ParameterBridge {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::sim::SimDevice;

    fn device() -> SimDevice {
        SimDevice::with_parameters(&["rotary1", "play"])
    }

    #[test_log::test]
    fn test_deferred_value_survives_until_device_exists() {
        let mut bridge = ParameterBridge::default();
        let mut absent: Option<SimDevice> = None;

        let delivery = bridge
            .set_parameter(absent.as_mut(), "rotary1", 0.1)
            .unwrap();
        assert_eq!(delivery, Delivery::Deferred);
        bridge.set_parameter(absent.as_mut(), "rotary1", 0.42).unwrap();
        assert_eq!(bridge.pending_len(), 1);

        bridge.retry_tick(absent.as_mut());
        assert_eq!(bridge.pending_len(), 1);

        let mut device = device();
        assert_eq!(bridge.retry_tick(Some(&mut device)), 1);
        assert_eq!(device.parameter("rotary1"), Some(0.42));
        assert_eq!(bridge.pending_len(), 0);
    }

    #[test]
    fn test_unknown_parameter_is_reported() {
        let mut bridge = ParameterBridge::default();
        let mut device = device();
        let result = bridge.set_parameter(Some(&mut device), "rotary99", 0.5);
        assert!(matches!(result, Err(DeckError::ParameterNotFound(name)) if name == "rotary99"));
    }

    #[test_log::test]
    fn test_retries_are_bounded() {
        let mut bridge = ParameterBridge::new(RetryPolicy {
            interval_ms: 1000,
            max_attempts: 3,
        });
        let mut absent: Option<SimDevice> = None;
        bridge.set_parameter(absent.as_mut(), "play", 1.0).unwrap();

        for _ in 0..3 {
            bridge.retry_tick(absent.as_mut());
            assert_eq!(bridge.pending_len(), 1);
        }
        bridge.retry_tick(absent.as_mut());
        assert_eq!(bridge.pending_len(), 0);
    }

    #[test]
    fn test_messages_coalesce_per_tag_and_keep_order() {
        let mut bridge = ParameterBridge::default();
        let mut absent: Option<SimDevice> = None;
        bridge.send_message(absent.as_mut(), "seq1", vec![1.0; 16]).unwrap();
        bridge.set_parameter(absent.as_mut(), "play", 1.0).unwrap();
        bridge.send_message(absent.as_mut(), "seq1", vec![0.0; 16]).unwrap();
        assert_eq!(bridge.pending_len(), 2);

        let mut device = device();
        bridge.flush(Some(&mut device));
        let sent = device.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], ("seq1".to_string(), vec![0.0; 16]));
    }

    #[test]
    fn test_cancel_pending() {
        let mut bridge = ParameterBridge::default();
        let mut absent: Option<SimDevice> = None;
        bridge.set_parameter(absent.as_mut(), "play", 1.0).unwrap();
        bridge.cancel_pending();
        assert_eq!(bridge.pending_len(), 0);
    }

    #[test]
    fn test_dispatch_reaches_every_subscriber() {
        let mut bridge = ParameterBridge::default();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for _ in 0..2 {
            let seen = Rc::clone(&seen);
            bridge.on_device_parameter_change(move |name, value| {
                seen.borrow_mut().push((name.to_string(), value));
            });
        }

        bridge.dispatch(&DeviceEvent::ParameterChanged {
            name: "playstat".to_string(),
            value: 0.25,
        });
        bridge.dispatch(&DeviceEvent::Message {
            tag: "step".to_string(),
            payload: vec![3.0],
        });

        assert_eq!(seen.borrow().len(), 2);
        assert!(seen.borrow().iter().all(|(n, v)| n == "playstat" && *v == 0.25));
    }
}
