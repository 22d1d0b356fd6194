pub mod measurement_csv_file;
pub mod measurement_list;

pub use measurement_csv_file::MeasurementCsvFileSource;
pub use measurement_list::MeasurementListSource;
