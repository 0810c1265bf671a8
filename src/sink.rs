/// Downstream side: one `Record` per emitted line.
///
/// Sessions run on blocking threads and push into a bounded channel; a single
/// async writer drains it to stdout as JSON lines so records from concurrent
/// sessions never interleave mid-line.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// One shipped line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub message: String,
    pub host: String,
    pub url: String,
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Record {
    pub fn new(message: String, host: &str, url: &str) -> Self {
        Self {
            message,
            host: host.to_string(),
            url: url.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Accepts records in resource order. Delivery failures are the sink's
/// own concern.
pub trait Sink: Send {
    fn emit(&mut self, record: Record);
}

/// Sink half handed to each session.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Record>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Record>) -> Self {
        Self { tx }
    }
}

impl Sink for ChannelSink {
    /// Must be called off the async runtime (sessions tick inside
    /// `spawn_blocking`).
    fn emit(&mut self, record: Record) {
        if self.tx.blocking_send(record).is_err() {
            log::debug!("Record writer is gone, dropping record");
        }
    }
}

/// Drain `rx` into `out`, one JSON object per line, until every sender is dropped.
pub async fn write_records<W: AsyncWrite + Unpin>(mut rx: mpsc::Receiver<Record>, mut out: W) {
    while let Some(record) = rx.recv().await {
        if let Err(e) = write_line(&mut out, &record).await {
            log::error!("Failed to write record from {}: {e}", record.url);
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, record: &Record) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_logstash_style() {
        let record = Record::new("GET /health 200".into(), "web-1", "http://logs.local/access.log");
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["message"], "GET /health 200");
        assert_eq!(json["host"], "web-1");
        assert_eq!(json["url"], "http://logs.local/access.log");
        assert!(json["@timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn writer_emits_one_json_line_per_record() {
        let (tx, rx) = mpsc::channel(8);
        let writer = tokio::spawn(async move {
            let mut out = Vec::new();
            write_records(rx, &mut out).await;
            out
        });

        let mut sink = ChannelSink::new(tx);
        tokio::task::spawn_blocking(move || {
            sink.emit(Record::new("alpha".into(), "h", "u"));
            sink.emit(Record::new("beta".into(), "h", "u"));
        })
        .await
        .unwrap();

        let out = String::from_utf8(writer.await.unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["message"], "alpha");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["message"], "beta");
    }
}
