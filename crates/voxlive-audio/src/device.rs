use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};
use voxlive_core::AudioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

pub struct DeviceManager {
    host: Host,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    pub fn list(&self, direction: Direction) -> Result<Vec<(String, Device)>, AudioError> {
        let devices = match direction {
            Direction::Input => self.host.input_devices(),
            Direction::Output => self.host.output_devices(),
        }
        .map_err(|e| AudioError::DeviceEnumeration(e.to_string()))?;

        Ok(devices
            .map(|device| {
                let name = device.name().unwrap_or_else(|_| "unknown".to_string());
                (name, device)
            })
            .collect())
    }

    pub fn names(&self, direction: Direction) -> Result<Vec<String>, AudioError> {
        Ok(self
            .list(direction)?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    /// Resolve a configured device name; `"default"` selects the host default.
    pub fn find(&self, direction: Direction, name: &str) -> Result<Device, AudioError> {
        if name == "default" {
            let device = match direction {
                Direction::Input => self.host.default_input_device(),
                Direction::Output => self.host.default_output_device(),
            };
            return device.ok_or_else(|| {
                AudioError::DeviceNotFound(format!("no default {} device", direction.label()))
            });
        }

        self.list(direction)?
            .into_iter()
            .find(|(dev_name, _)| dev_name == name)
            .map(|(_, device)| device)
            .ok_or_else(|| {
                AudioError::DeviceNotFound(format!("{} device not found: {}", direction.label(), name))
            })
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}
