use crate::domain::fees::BatchQuote;
use crate::error::Result;
use std::io::Write;

/// Writes a batch quote as CSV: one row per line item, then a `TOTAL` row.
pub struct QuoteWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> QuoteWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_quote(&mut self, quote: &BatchQuote) -> Result<()> {
        self.writer.write_record([
            "item_id",
            "category",
            "base_amount",
            "tax_rate",
            "tax_amount",
            "platform_fee",
            "gateway_fee",
            "total_amount",
        ])?;

        for line in &quote.item_breakdown {
            self.writer.write_record([
                line.item_id.clone(),
                line.category.clone(),
                line.base_amount.to_string(),
                line.tax_rate.to_string(),
                line.tax_amount.to_string(),
                line.platform_fee.to_string(),
                line.gateway_fee.to_string(),
                line.total_amount.to_string(),
            ])?;
        }

        let summary = &quote.summary;
        self.writer.write_record([
            "TOTAL".to_string(),
            format!("{} items", summary.item_count),
            summary.total_base_amount.to_string(),
            String::new(),
            summary.total_tax_amount.to_string(),
            summary.total_platform_fee.to_string(),
            summary.total_gateway_fee.to_string(),
            summary.total_amount.to_string(),
        ])?;

        self.writer.flush()?;
        Ok(())
    }
}
