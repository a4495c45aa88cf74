/// Application name, used for the state directory and prompts.
pub const APP_NAME: &str = "cairn";

/// Default directory for persisted state, relative to the working directory.
pub const DEFAULT_STATE_DIR: &str = ".cairn/state";

/// Prefix under which per-file resource blobs are stored.
pub const STATE_PREFIX: &str = "resources/";

/// Suffix of a per-file resource blob.
pub const STATE_SUFFIX: &str = ".json";

/// Version of the persisted state format.
pub const STATE_VERSION: u32 = 1;

/// Record of an in-flight workflow, used to resume after interruption.
pub const EXECUTION_FILE: &str = "workflow-execution.json";

/// Lock file guarding the state directory.
pub const LOCK_FILENAME: &str = ".lock";

/// Maximum evaluation passes before giving up on deferred references.
pub const DEFAULT_RETRY_BUDGET: usize = 16;

/// Rounds of plan-and-execute in one `up` when workflows keep running.
pub const MAX_WORKFLOW_ROUNDS: usize = 3;

pub const ENV_STATE_DIR: &str = "CAIRN_STATE_DIR";
pub const ENV_RETRY_BUDGET: &str = "CAIRN_RETRY_BUDGET";
pub const ENV_WAIT_TIMEOUT: &str = "CAIRN_WAIT_TIMEOUT";
pub const ENV_WAIT_INTERVAL: &str = "CAIRN_WAIT_INTERVAL";
pub const ENV_WAIT_PROMPT: &str = "CAIRN_WAIT_PROMPT";
