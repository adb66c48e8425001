mod power_record;

pub use power_record::PowerRecordRepository;
