//! Metrics collection for payload compression
//!
//! This module provides statistics about how much the encoded matrices
//! shrink on their way to the wire.

/// Compression statistics collector
#[derive(Debug, Clone, Default)]
pub struct CompressionMetrics {
    /// Total encoded bytes (before compression)
    pub raw_bytes: u64,
    /// Total bytes put on the wire (after compression)
    pub compressed_bytes: u64,
    /// Number of payloads produced
    pub payload_count: u64,
    /// Number of matrices across all payloads
    pub matrix_count: u64,
    /// Number of rows across all payloads
    pub row_count: u64,
}

impl CompressionMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one payload
    pub fn record_payload(
        &mut self,
        raw_size: usize,
        compressed_size: usize,
        matrices: usize,
        rows: usize,
    ) {
        self.raw_bytes += raw_size as u64;
        self.compressed_bytes += compressed_size as u64;
        self.payload_count += 1;
        self.matrix_count += matrices as u64;
        self.row_count += rows as u64;
    }

    /// Calculate compression ratio (higher = better)
    /// Returns raw_size / compressed_size
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            return 1.0;
        }
        self.raw_bytes as f64 / self.compressed_bytes as f64
    }

    /// Calculate space savings percentage
    /// Returns (1 - compressed/raw) * 100
    pub fn space_savings_percent(&self) -> f64 {
        if self.raw_bytes == 0 {
            return 0.0;
        }
        (1.0 - (self.compressed_bytes as f64 / self.raw_bytes as f64)) * 100.0
    }

    /// Get average payload size in bytes
    pub fn average_payload_size(&self) -> f64 {
        if self.payload_count == 0 {
            return 0.0;
        }
        self.compressed_bytes as f64 / self.payload_count as f64
    }

    /// Merge another collector into this one
    pub fn merge(&mut self, other: &CompressionMetrics) {
        self.raw_bytes += other.raw_bytes;
        self.compressed_bytes += other.compressed_bytes;
        self.payload_count += other.payload_count;
        self.matrix_count += other.matrix_count;
        self.row_count += other.row_count;
    }

    /// Generate a human-readable report
    pub fn report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== VDX Compression Metrics ===\n\n");

        report.push_str(&format!("Payloads: {}\n", self.payload_count));
        report.push_str(&format!("Matrices: {}\n", self.matrix_count));
        report.push_str(&format!("Rows: {}\n", self.row_count));
        report.push_str(&format!("Raw bytes: {} bytes\n", self.raw_bytes));
        report.push_str(&format!(
            "Compressed bytes: {} bytes\n",
            self.compressed_bytes
        ));
        report.push_str(&format!(
            "Compression ratio: {:.2}x\n",
            self.compression_ratio()
        ));
        report.push_str(&format!(
            "Space savings: {:.1}%\n",
            self.space_savings_percent()
        ));
        report.push_str(&format!(
            "Average payload size: {:.1} bytes\n",
            self.average_payload_size()
        ));

        report
    }
}
