pub mod raw_record_source;
pub mod report_output_adapter;
