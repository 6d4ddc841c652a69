//! Measurement records and their InfluxDB line protocol encoding.
//!
//! One verified reply becomes one line on stdout:
//! ```text
//! ping,host=probe1,dest=example.com,comment=edge size=56,reply_from="192.0.2.7",
//!     reply_to="192.0.2.1",icmp_id=4660,icmp_seq=1,hop_limit=57,rtt=0.012345678 1700000000123456789
//! ```
//! (wrapped here; emitted as a single line). `host`, `comment`, `reply_to`
//! and `hop_limit` are omitted when absent.

use std::fmt::Write as _;
use std::io::Write as _;
use std::net::IpAddr;
use std::time::Duration;

use crate::core::RecordSink;
use crate::transport::PeerAddr;

/// Measurement name of every line.
pub const MEASUREMENT: &str = "ping";

/// One verified reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementRecord {
    /// `host` tag; omitted when empty.
    pub host_tag: String,
    /// `dest` tag: the configured destination.
    pub destination: String,
    /// `comment` tag; omitted when empty.
    pub comment: String,
    /// Echo body size in bytes.
    pub size: usize,
    /// Sender of the reply.
    pub reply_from: PeerAddr,
    /// Local address the reply was sent to.
    pub reply_to: Option<IpAddr>,
    /// Session id from the ICMP header.
    pub icmp_id: u16,
    /// ICMP header sequence plus one.
    pub icmp_seq: u32,
    /// TTL / hop limit of the reply.
    pub hop_limit: Option<u8>,
    /// Round-trip time in nanoseconds.
    pub rtt_nanos: i64,
    /// Unique output timestamp, Unix nanoseconds.
    pub timestamp_nanos: i128,
}

impl MeasurementRecord {
    /// Encode as one line protocol line, including the trailing newline.
    pub fn to_line(&self) -> String {
        let mut line = String::with_capacity(160);
        line.push_str(MEASUREMENT);
        line.push(',');
        if !self.host_tag.is_empty() {
            line.push_str("host=");
            line.push_str(&escape_key(&self.host_tag));
            line.push(',');
        }
        line.push_str("dest=");
        line.push_str(&escape_key(&self.destination));
        if !self.comment.is_empty() {
            line.push_str(",comment=");
            line.push_str(&escape_key(&self.comment));
        }

        // Writing into a String cannot fail.
        let _ = write!(
            line,
            " size={},reply_from={},",
            self.size,
            escape_value(&self.reply_from.to_string())
        );
        if let Some(reply_to) = self.reply_to {
            let _ = write!(line, "reply_to={},", escape_value(&reply_to.to_string()));
        }
        let _ = write!(line, "icmp_id={},icmp_seq={},", self.icmp_id, self.icmp_seq);
        if let Some(hop_limit) = self.hop_limit {
            let _ = write!(line, "hop_limit={hop_limit},");
        }
        let _ = writeln!(
            line,
            "rtt={} {}",
            format_rtt(self.rtt_nanos),
            self.timestamp_nanos
        );
        line
    }
}

/// Seconds with nine fractional digits.
///
/// The integer part is truncated toward zero and the fraction printed as its
/// absolute value, so `-1.5s` reads `-1.500000000` and `-0.5s` reads
/// `0.500000000`.
pub fn format_rtt(rtt_nanos: i64) -> String {
    let whole = rtt_nanos / 1_000_000_000;
    let frac = (rtt_nanos % 1_000_000_000).abs();
    format!("{whole}.{frac:09}")
}

/// Escape a tag key or value.
///
/// Newlines become spaces; space, comma, `=` and backslash get a backslash.
pub fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '\n' => escaped.push_str("\\ "),
            ' ' | ',' | '=' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Quote a string field value.
///
/// Newlines become spaces; `"` and backslash get a backslash.
pub fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('"');
    for c in value.chars() {
        match c {
            '\n' => escaped.push(' '),
            '"' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped.push('"');
    escaped
}

/// Start-up banner of one destination.
pub fn banner(destination: &str, size: u16, delay: Duration) -> String {
    format!(
        "# PING {} with {} bytes of data, will start in {:.3} seconds.\n",
        destination.replace('\n', "\n# "),
        size,
        delay.as_secs_f64()
    )
}

/// Writes records and banners to stdout, one locked write per line.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl StdoutSink {
    fn write(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = stdout.write_all(text.as_bytes()).and_then(|()| stdout.flush()) {
            tracing::error!(error = %e, "failed to write to stdout");
        }
    }
}

impl RecordSink for StdoutSink {
    fn emit(&self, record: &MeasurementRecord) {
        self.write(&record.to_line());
    }

    fn announce(&self, destination: &str, size: u16, delay: Duration) {
        self.write(&banner(destination, size, delay));
    }
}
