pub mod item_reader;
pub mod quote_writer;
