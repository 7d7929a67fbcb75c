//! Per-request side channel ("backpack").
//!
//! Transports and conventions need to carry a few facts from request
//! conversion to result rendering that are not part of the protocol neutral
//! contract: who called, which id to echo back, whether the call must be
//! skipped. The set of keys is fixed here so every producer and consumer
//! agrees on names and types at compile time.

use std::net::IpAddr;
use std::time::Instant;

use chrono::{DateTime, Utc};

/// Side channel metadata of one call
#[derive(Clone, Debug)]
pub struct Backpack {
    /// Address of the caller as reported by the transport
    pub caller: Option<IpAddr>,

    /// Skip the function and answer with an empty success
    pub skip_function_call: bool,

    /// Render a service description instead of the function result
    pub describe: bool,

    /// The caller expects no response body
    pub notification: bool,

    /// Monotonic start of the call, used for durations
    pub started: Instant,

    /// Wall clock start of the call, used for reporting
    pub start_time: DateTime<Utc>,

    /// HTTP status requested by the convention, overriding the shared mapping
    pub status_code: Option<u16>,

    /// Request identifier to echo back (JSON-RPC `id`)
    pub request_id: Option<serde_json::Value>,

    /// Name of the convention that converted the request
    pub convention: Option<&'static str>,

    /// Function name as received on the wire
    pub function: Option<String>,
}

impl Default for Backpack {
    fn default() -> Self {
        Self {
            caller: None,
            skip_function_call: false,
            describe: false,
            notification: false,
            started: Instant::now(),
            start_time: Utc::now(),
            status_code: None,
            request_id: None,
            convention: None,
            function: None,
        }
    }
}

impl Backpack {
    /// Fresh backpack stamped with the current time
    pub fn new() -> Self {
        Self::default()
    }

    /// Milliseconds elapsed since the call started
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
