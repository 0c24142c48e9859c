//! # Protocol Constants
//!
//! Defaults shared by the runtime, the sync components and the room relay.
//! Runtime values can be overridden through configuration; wire-level values
//! cannot.

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Length of the ASCII identifier prefixing every binary frame.
pub const BINARY_IDENTIFIER_LEN: usize = 4;

/// Payload field naming the target entity of a keyed message.
pub const GUID_FIELD: &str = "guid";

/// Payload flag marking a transient message that is not stored as room state.
pub const DONT_SAVE_FIELD: &str = "dontSave";

/// Extension key holding component records inside a scene document.
pub const COMPONENTS_EXTENSION: &str = "TANDEM_components";

// =============================================================================
// FRAME TIMING
// =============================================================================

/// Largest frame delta fed to the scheduler, in seconds.
pub const MAX_DELTA_TIME: f32 = 0.1;

// =============================================================================
// SYNCHRONIZATION DEFAULTS
// =============================================================================

/// Frames between two pose sends of a sync component.
pub const SEND_INTERVAL_FRAMES: u32 = 2;

/// Blend window over which receivers ease toward a new pose, in seconds.
pub const BLEND_SECONDS: f32 = 0.15;

/// Minimum movement before a pose is re-sent.
pub const POSITION_THRESHOLD: f32 = 0.001;

/// Minimum rotation (radians) before a pose is re-sent.
pub const ROTATION_THRESHOLD: f32 = 0.01;

/// Remote mirrors with no update for this long are removed, in seconds.
pub const REMOTE_TIMEOUT_SECONDS: f32 = 10.0;

/// Payloads older than this are discarded on receipt, in milliseconds.
pub const STALE_PAYLOAD_MS: f64 = 5000.0;

/// Frames between two ownership re-requests of an unowned user state.
pub const OWNERSHIP_REREQUEST_FRAMES: u32 = 120;

/// Suffix appended to a connection id to form its camera guid.
pub const CAMERA_GUID_SUFFIX: &str = "_camera";
