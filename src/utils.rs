/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/
use crate::error::{StreamError, StreamResult};
use crate::messages::{FIELD_CMD, FIELD_ENTITY_TYPE, FIELD_EVENT, TOPIC_EVENT, TOPIC_QUOTE};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// Longest frame prefix quoted in classification errors.
const ERROR_PREVIEW_LEN: usize = 64;

/// Classifies an Etna frame by scanning its first bytes.
///
/// Topic frames start with `{"EntityType": "<topic>"`, command frames with
/// `{"Cmd": "<cmd>"`. Nothing past the closing quote of the value is parsed.
pub fn etna_topic(data: &[u8]) -> StreamResult<String> {
    marker_value(data, FIELD_ENTITY_TYPE)
        .or_else(|| marker_value(data, FIELD_CMD))
        .map(str::to_string)
        .ok_or_else(|| {
            StreamError::Protocol(format!(
                "WS message has neither topic nor cmd: {}",
                preview(data)
            ))
        })
}

/// Classifies an FMP frame: `{"event":` frames are control events, every
/// other object is a quote.
pub fn fmp_topic(data: &[u8]) -> StreamResult<String> {
    if data.len() < 10 || data[0] != b'{' {
        return Err(StreamError::Protocol(format!(
            "wrong FMP data: {}",
            preview(data)
        )));
    }
    if data.starts_with(FIELD_EVENT) {
        Ok(TOPIC_EVENT.to_string())
    } else {
        Ok(TOPIC_QUOTE.to_string())
    }
}

/// Returns the quoted value that directly follows `{` + `marker`, up to the
/// next unescaped quote.
fn marker_value<'a>(data: &'a [u8], marker: &[u8]) -> Option<&'a str> {
    let quote = 1 + marker.len();
    if data.len() <= quote + 1 || data[0] != b'{' || &data[1..quote] != marker || data[quote] != b'"'
    {
        return None;
    }

    let start = quote + 1;
    let mut i = start;
    while i < data.len() {
        match data[i] {
            b'\\' => i += 2,
            b'"' => break,
            _ => i += 1,
        }
    }
    if i >= data.len() || i == start {
        return None;
    }
    std::str::from_utf8(&data[start..i]).ok()
}

fn preview(data: &[u8]) -> String {
    let end = data.len().min(ERROR_PREVIEW_LEN);
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Wait before reconnect attempt `attempt`.
///
/// `|10·b·sin(i / 2b) + i| + b` seconds for base interval `b`: the first retry
/// comes after exactly `b`, later ones oscillate while drifting upwards.
pub fn reconnect_delay(attempt: u32, base: Duration) -> Duration {
    let b = base.as_secs_f64();
    if b <= 0.0 {
        return Duration::ZERO;
    }
    let i = f64::from(attempt);
    let secs = (b * 10.0 * (i / (2.0 * b)).sin() + i).abs() + b;
    Duration::from_secs_f64(secs)
}

/// Bounded record queue whose receiving half is handed out once.
///
/// Records published before anyone takes the receiver are dropped, so a
/// record type nobody listens to never fills up and stalls the receive task.
pub(crate) struct Outlet<T> {
    what: &'static str,
    tx: mpsc::Sender<T>,
    rx: Mutex<Option<mpsc::Receiver<T>>>,
}

impl<T> Outlet<T> {
    pub(crate) fn new(what: &'static str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            what,
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Hands out the receiver; later calls fail.
    pub(crate) fn take(&self) -> StreamResult<mpsc::Receiver<T>> {
        self.slot()
            .take()
            .ok_or_else(|| StreamError::Protocol(format!("{} stream already taken", self.what)))
    }

    fn is_taken(&self) -> bool {
        self.slot().is_none()
    }

    fn slot(&self) -> MutexGuard<'_, Option<mpsc::Receiver<T>>> {
        self.rx.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publishes one record, waiting for room in the queue.
    pub(crate) async fn publish(&self, item: T) -> StreamResult<()> {
        if !self.is_taken() {
            return Ok(());
        }
        self.tx
            .send(item)
            .await
            .map_err(|_| StreamError::ChannelClosed(format!("{} stream", self.what)))
    }
}
