pub const ROWS_READ: &str = "flight_warehouse_rows_read_total";
pub const ROWS_APPENDED: &str = "flight_warehouse_rows_appended_total";
pub const DUPLICATE_ROWS_DROPPED: &str = "flight_warehouse_duplicate_rows_dropped_total";
pub const EXISTING_ROWS_SKIPPED: &str = "flight_warehouse_existing_rows_skipped_total";
pub const LOOKUP_TIME: &str = "flight_warehouse_lookup_seconds";
pub const LOOKUP_INTEGRITY_FAILURES: &str = "flight_warehouse_lookup_integrity_failures_total";
pub const UNCLASSIFIED_INTERVAL_ROWS: &str = "flight_warehouse_unclassified_interval_rows_total";
pub const STAGE_TIME: &str = "flight_warehouse_stage_seconds";
pub const RAW_DATA_DOWNLOADS: &str = "flight_warehouse_raw_data_downloads_total";
