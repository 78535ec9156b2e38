//! Streaming types and session-context chunking.
//!
//! Plain streaming emits bounded chunks in `(@timestamp desc, _id desc)`
//! order, each carrying the cursor to resume after it. Session-context
//! chunking regroups the same window so events sharing a session key
//! (source address, user name, session id) stay adjacent; a session is
//! never split across chunks unless it alone exceeds chunk capacity, in
//! which case the continuation chunk is annotated as a boundary.

use serde::Serialize;
use serde_json::Value;

use talon_backends::EventDoc;
use talon_backends::fieldmap::FieldMap;

/// One emitted chunk.
#[derive(Debug, Clone, Serialize)]
pub struct SessionChunk {
    /// Event documents, source bodies only.
    pub events: Vec<Value>,
    /// Distinct session keys present in this chunk (session mode only).
    pub session_keys: Vec<String>,
    /// True when this chunk continues a session split by capacity.
    pub boundary: bool,
    /// Cursor resuming after this chunk (plain streaming only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// The full result of one streaming call.
#[derive(Debug, Clone, Serialize)]
pub struct StreamOutcome {
    /// Chunks, in emission order.
    pub chunks: Vec<SessionChunk>,
    /// Cursor to resume the stream, or `None` when exhausted.
    pub final_cursor: Option<String>,
    /// Totals for the call.
    pub summary: Value,
}

/// The grouping key: `source_ip|username|session_id`, with `-` for
/// missing components.
pub(crate) fn session_key(map: &FieldMap, doc: &Value) -> String {
    let part = |field: &str| map.extract_str(doc, field).unwrap_or("-").to_owned();
    format!(
        "{}|{}|{}",
        part("source_ip"),
        part("username"),
        part("session_id")
    )
}

/// Regroup fetched events into session-contiguous chunks.
///
/// Sessions appear in order of their newest event. Returns each chunk's
/// documents plus its boundary flag.
pub(crate) fn pack_session_chunks(
    events: &[EventDoc],
    map: &FieldMap,
    chunk_size: usize,
) -> Vec<(Vec<EventDoc>, Vec<String>, bool)> {
    // Group by key, preserving first-appearance order.
    let mut order: Vec<String> = Vec::new();
    let mut groups: std::collections::HashMap<String, Vec<EventDoc>> =
        std::collections::HashMap::new();
    for event in events {
        let key = session_key(map, &event.source);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(event.clone());
    }

    let mut chunks: Vec<(Vec<EventDoc>, Vec<String>, bool)> = Vec::new();
    let mut current: Vec<EventDoc> = Vec::new();
    let mut current_keys: Vec<String> = Vec::new();
    let mut current_boundary = false;

    for key in order {
        let Some(group) = groups.remove(&key) else {
            continue;
        };

        if group.len() > chunk_size {
            // One session larger than a whole chunk: flush, then split it,
            // annotating every continuation chunk.
            if !current.is_empty() {
                chunks.push((
                    std::mem::take(&mut current),
                    std::mem::take(&mut current_keys),
                    current_boundary,
                ));
                current_boundary = false;
            }
            let mut first = true;
            for piece in group.chunks(chunk_size) {
                chunks.push((piece.to_vec(), vec![key.clone()], !first));
                first = false;
            }
            continue;
        }

        if current.len() + group.len() > chunk_size && !current.is_empty() {
            chunks.push((
                std::mem::take(&mut current),
                std::mem::take(&mut current_keys),
                current_boundary,
            ));
            current_boundary = false;
        }
        current.extend(group);
        current_keys.push(key);
    }

    if !current.is_empty() {
        chunks.push((current, current_keys, current_boundary));
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, ip: &str, session: &str) -> EventDoc {
        EventDoc {
            id: id.to_owned(),
            source: json!({
                "source": { "ip": ip },
                "user": { "name": "root" },
                "session": { "id": session },
            }),
            sort: None,
        }
    }

    #[test]
    fn test_sessions_stay_adjacent() {
        let map = FieldMap::dshield();
        // Interleaved sessions a and b.
        let events = vec![
            doc("1", "10.0.0.1", "a"),
            doc("2", "10.0.0.2", "b"),
            doc("3", "10.0.0.1", "a"),
            doc("4", "10.0.0.2", "b"),
        ];
        let chunks = pack_session_chunks(&events, &map, 4);
        assert_eq!(chunks.len(), 1);
        let ids: Vec<&str> = chunks[0].0.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3", "2", "4"]);
        assert!(!chunks[0].2);
    }

    #[test]
    fn test_session_never_split_when_it_fits() {
        let map = FieldMap::dshield();
        let events = vec![
            doc("1", "10.0.0.1", "a"),
            doc("2", "10.0.0.1", "a"),
            doc("3", "10.0.0.1", "a"),
            doc("4", "10.0.0.2", "b"),
            doc("5", "10.0.0.2", "b"),
        ];
        // Chunk size 4: session b (2 events) cannot join session a's chunk
        // (3 events) without splitting, so it starts the next chunk.
        let chunks = pack_session_chunks(&events, &map, 4);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].0.len(), 3);
        assert_eq!(chunks[1].0.len(), 2);
        assert!(!chunks[1].2);
    }

    #[test]
    fn test_oversized_session_splits_with_boundary_annotation() {
        let map = FieldMap::dshield();
        let events: Vec<EventDoc> = (0..7)
            .map(|i| doc(&i.to_string(), "10.0.0.1", "big"))
            .collect();
        let chunks = pack_session_chunks(&events, &map, 3);
        assert_eq!(chunks.len(), 3);
        assert!(!chunks[0].2, "first piece is not a continuation");
        assert!(chunks[1].2);
        assert!(chunks[2].2);
    }

    #[test]
    fn test_session_key_handles_missing_fields() {
        let map = FieldMap::dshield();
        let key = session_key(&map, &json!({ "source": { "ip": "10.0.0.1" } }));
        assert_eq!(key, "10.0.0.1|-|-");
    }
}
