#![no_main]
//! Feeds arbitrary bytes through the marker parser and the timeline engine.
//! Any panic is a bug; malformed markers must come back as `None`.

use libfuzzer_sys::fuzz_target;
use trainwatch_core::{MarkerEvent, MarkerParser, TimelineEngine};

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let parser = MarkerParser::default();

    for line in text.lines() {
        if let Some(MarkerEvent::Epoch { current, total }) = parser.parse(line) {
            assert!(total == 0 || current <= total);
        }
    }

    let engine = TimelineEngine::default();
    let lines: Vec<&str> = text.lines().collect();
    let once = engine.process_lines(&engine.create_timeline(), &lines);
    let twice = engine.process_lines(&once, &lines);
    assert_eq!(once.stage_history.len(), twice.stage_history.len());
    assert_eq!(once.epoch_progress, twice.epoch_progress);
});
