// mihub - Xiaomi gateway bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Remote actions
//!
//! Two host-callable actions control a gateway's speaker:
//!
//! | Action          | Parameters                                        |
//! |-----------------|---------------------------------------------------|
//! | `play_ringtone` | `ringtone_id` (req), `gw_sid` (req), `ringtone_vol` |
//! | `stop_ringtone` | `gw_sid` (req)                                    |
//!
//! Each call is validated, resolved against the registry and then written
//! to the hub. [`RemoteActionDispatcher::invoke`] is the host-facing entry:
//! it logs failures instead of returning them.

use std::fmt;
use std::sync::Arc;

use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{GatewayClient, HubCommand};
use crate::error::ActionError;
use crate::registry::GatewayRegistry;

/// Ringtone ids the gateway firmware does not define
pub const RESERVED_RINGTONE_IDS: [i64; 7] = [9, 14, 15, 16, 17, 18, 19];

/// Highest accepted ringtone volume
pub const MAX_RINGTONE_VOLUME: i64 = 100;

/// Registered actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    PlayRingtone,
    StopRingtone,
}

impl ActionKind {
    pub const ALL: [ActionKind; 2] = [ActionKind::PlayRingtone, ActionKind::StopRingtone];

    /// Name the action is registered under
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::PlayRingtone => "play_ringtone",
            ActionKind::StopRingtone => "stop_ringtone",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// Call data of `play_ringtone`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayRingtoneParams {
    /// Ringtone id; an integer or a numeric string
    #[serde(default)]
    pub ringtone_id: Option<Value>,
    /// Target gateway
    #[serde(default)]
    pub gw_sid: Option<String>,
    /// Volume in 0..=100
    #[serde(default)]
    pub ringtone_vol: Option<Value>,
}

impl PlayRingtoneParams {
    pub fn new(gw_sid: &str, ringtone_id: i64) -> Self {
        Self {
            ringtone_id: Some(Value::from(ringtone_id)),
            gw_sid: Some(gw_sid.to_string()),
            ringtone_vol: None,
        }
    }

    pub fn with_volume(mut self, volume: i64) -> Self {
        self.ringtone_vol = Some(Value::from(volume));
        self
    }
}

/// Call data of `stop_ringtone`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopRingtoneParams {
    #[serde(default)]
    pub gw_sid: Option<String>,
}

impl StopRingtoneParams {
    pub fn new(gw_sid: &str) -> Self {
        Self {
            gw_sid: Some(gw_sid.to_string()),
        }
    }
}

/// Result of a host-facing invocation
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The command was written to the hub
    Written,
    /// The call failed; the error was logged
    Failed(ActionError),
}

impl ActionOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, ActionOutcome::Written)
    }

    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            ActionOutcome::Written => "ok",
            ActionOutcome::Failed(_) => "error",
        }
    }
}

/// Executes ringtone actions against live gateways
pub struct RemoteActionDispatcher {
    registry: Arc<GatewayRegistry>,
    client: Arc<dyn GatewayClient>,
}

impl RemoteActionDispatcher {
    pub fn new(registry: Arc<GatewayRegistry>, client: Arc<dyn GatewayClient>) -> Self {
        Self { registry, client }
    }

    /// Play a ringtone on a gateway
    ///
    /// # Errors
    ///
    /// Fails without writing anything when a parameter is missing or invalid,
    /// the ringtone id is reserved, or no live gateway matches `gw_sid`.
    pub fn play_ringtone(&self, params: &PlayRingtoneParams) -> Result<(), ActionError> {
        let raw_id = params
            .ringtone_id
            .as_ref()
            .ok_or(ActionError::MissingParameter("ringtone_id"))?;
        let gw_sid = params
            .gw_sid
            .as_deref()
            .ok_or(ActionError::MissingParameter("gw_sid"))?;

        let mid = integer("ringtone_id", raw_id)?;
        let vol = params
            .ringtone_vol
            .as_ref()
            .map(volume)
            .transpose()?;

        if RESERVED_RINGTONE_IDS.contains(&mid) {
            return Err(ActionError::ReservedRingtoneId(mid));
        }

        self.execute(gw_sid, HubCommand::PlayRingtone { mid, vol })
    }

    /// Stop the ringtone playing on a gateway
    pub fn stop_ringtone(&self, params: &StopRingtoneParams) -> Result<(), ActionError> {
        let gw_sid = params
            .gw_sid
            .as_deref()
            .ok_or(ActionError::MissingParameter("gw_sid"))?;
        self.execute(gw_sid, HubCommand::StopRingtone)
    }

    /// Run an action from raw call data; failures are logged, not returned
    pub fn invoke(&self, action: &str, data: &Value) -> ActionOutcome {
        match self.dispatch(action, data) {
            Ok(()) => ActionOutcome::Written,
            Err(e) => {
                error!("{} failed: {}", action, e);
                ActionOutcome::Failed(e)
            }
        }
    }

    fn dispatch(&self, action: &str, data: &Value) -> Result<(), ActionError> {
        match ActionKind::from_name(action) {
            Some(ActionKind::PlayRingtone) => self.play_ringtone(&call_data(data)?),
            Some(ActionKind::StopRingtone) => self.stop_ringtone(&call_data(data)?),
            None => Err(ActionError::UnknownAction(action.to_string())),
        }
    }

    fn execute(&self, gw_sid: &str, command: HubCommand) -> Result<(), ActionError> {
        let connection = self
            .registry
            .find(gw_sid)
            .map_err(|_| ActionError::UnknownGateway(gw_sid.to_string()))?;

        self.client.write_to_hub(&connection.target(), &command)?;
        info!("{} sent to gateway {}", command.name(), connection.sid());
        Ok(())
    }
}

impl fmt::Debug for RemoteActionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteActionDispatcher")
            .field("gateways", &self.registry.len())
            .finish()
    }
}

fn call_data<T>(data: &Value) -> Result<T, ActionError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if data.is_null() {
        return Ok(T::default());
    }
    T::deserialize(data).map_err(|e| ActionError::InvalidParameter {
        name: "data",
        value: e.to_string(),
    })
}

fn integer(name: &'static str, raw: &Value) -> Result<i64, ActionError> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ActionError::InvalidParameter {
        name,
        value: raw.to_string(),
    })
}

fn volume(raw: &Value) -> Result<i64, ActionError> {
    let vol = integer("ringtone_vol", raw)?;
    if !(0..=MAX_RINGTONE_VOLUME).contains(&vol) {
        return Err(ActionError::InvalidParameter {
            name: "ringtone_vol",
            value: vol.to_string(),
        });
    }
    Ok(vol)
}
