//! Configuration management for the session daemon.
//!
//! This module handles loading and saving configuration from disk,
//! including known devices and their capability sets.

use std::{
   env, fs,
   path::{Path, PathBuf},
};

use bluer::Address;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::{
   aap::capability::{Capabilities, Capability, DeviceModel},
   error::{AapError, Result},
};

/// Main configuration structure for the daemon.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
   #[serde(default)]
   pub known_devices: Vec<KnownDevice>,
}

/// A device the daemon may open a session with.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct KnownDevice {
   pub address: String,
   #[serde(default)]
   pub name: SmolStr,
   #[serde(default)]
   pub model: DeviceModel,
   /// Replaces the model's capability preset when present.
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub capabilities: Option<Vec<Capability>>,
}

impl KnownDevice {
   pub fn bd_address(&self) -> Result<Address> {
      Ok(self.address.parse()?)
   }

   /// Capability set the session is gated on.
   pub fn capabilities(&self) -> Capabilities {
      match &self.capabilities {
         Some(list) => list.iter().copied().collect(),
         None => self.model.capabilities(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   pub fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(aapd_home) = env::var("AAPD_HOME") {
         PathBuf::from(aapd_home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else {
         dirs::config_dir().ok_or(AapError::ConfigDirNotFound)?
      };

      Ok(config_dir.join("aapd").join("config.toml"))
   }

   /// Returns the known device with the given address.
   pub fn find_device(&self, address: Address) -> Option<&KnownDevice> {
      self
         .known_devices
         .iter()
         .find(|d| d.bd_address().is_ok_and(|a| a == address))
   }

   /// Picks the device named by `address`, or the first known device.
   pub fn select_device(&self, address: Option<&str>) -> Result<&KnownDevice> {
      match address {
         Some(address) => {
            let address: Address = address.parse()?;
            self
               .find_device(address)
               .ok_or(AapError::DeviceNotConfigured(address))
         },
         None => self.known_devices.first().ok_or(AapError::NoDeviceConfigured),
      }
   }
}
