/// Staged master record set.
pub const MASTER_DATA_FILE_NAME: &str = "master-data.csv";

/// Staged query record set (linkage runs only).
pub const QUERY_DATA_FILE_NAME: &str = "query-data.csv";

/// Generated engine configuration.
pub const CONFIG_FILE_NAME: &str = "config.xml";

/// Number of names tried before workspace allocation gives up.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 5;

/// Exclusive upper bound of the random name suffix.
pub(crate) const SUFFIX_BOUND: u16 = 1000;
