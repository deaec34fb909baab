mod common;

use std::collections::VecDeque;

use serde_json::json;

use roundtap_lib::{
    browser::{BrowserError, ScriptKind},
    collector::{poll_once, RunState},
    db::RoundSource,
};

use common::{poll_settings, FakePage, MemorySink, Plan};

fn texts(values: &[&str]) -> VecDeque<Option<String>> {
    values.iter().map(|v| Some(v.to_string())).collect()
}

#[tokio::test]
async fn drained_events_and_dom_value_are_stored() {
    let plan = Plan {
        drains: VecDeque::from([Ok(json!([
            {
                "source": "ws",
                "url": "wss://game.example.test/socket",
                "raw": "{\"multiplier\":2.35,\"roundId\":\"r-7\"}",
                "parsed": {"multiplier": 2.35, "roundId": "r-7"},
            },
            {
                "source": "fetch",
                "url": "https://game.example.test/api/me",
                "raw": "{\"balance\":12}",
                "parsed": {"balance": 12},
            },
        ]))]),
        dom_texts: texts(&["1.50x"]),
        ..Plan::default()
    };
    let (page, journal) = FakePage::new(plan);
    let sink = MemorySink::default();
    let mut run = RunState::default();

    let report = poll_once(&page, &sink, &poll_settings(), &mut run).await.unwrap();

    assert_eq!(report.events, 2);
    assert_eq!(report.written, 2);
    assert!(report.dom_written);
    assert_eq!(report.transient_errors, 0);

    let rounds = sink.rounds();
    assert_eq!(rounds.len(), 2);
    assert_eq!(rounds[0].source, RoundSource::WebSocket);
    assert_eq!(rounds[0].value, Some(2.35));
    assert_eq!(rounds[0].round_id.as_deref(), Some("r-7"));
    assert_eq!(rounds[0].room.as_deref(), Some("main"));
    assert_eq!(rounds[1].source, RoundSource::Dom);
    assert_eq!(rounds[1].value, Some(1.5));
    assert_eq!(rounds[1].raw.as_deref(), Some("dom:1.50x"));

    let journal = journal.lock().unwrap();
    assert_eq!(journal.count(ScriptKind::DrainEvents), 1);
    assert_eq!(journal.count(ScriptKind::VisibleText), 1);
}

#[tokio::test]
async fn unchanged_dom_value_is_written_once() {
    let plan = Plan {
        dom_texts: texts(&["1.50x", "1.50x", " 1.50x ", "2.00x", "2.00x"]),
        ..Plan::default()
    };
    let (page, _) = FakePage::new(plan);
    let sink = MemorySink::default();
    let mut run = RunState::default();
    let settings = poll_settings();

    let mut dom_writes = Vec::new();
    for _ in 0..5 {
        let report = poll_once(&page, &sink, &settings, &mut run).await.unwrap();
        dom_writes.push(report.dom_written);
    }

    assert_eq!(dom_writes, vec![true, false, false, true, false]);
    let values: Vec<_> = sink.rounds().iter().map(|r| r.value).collect();
    assert_eq!(values, vec![Some(1.5), Some(2.0)]);
    assert_eq!(run.dom.last(), Some(2.0));
}

#[tokio::test]
async fn failed_write_is_dropped_and_polling_continues() {
    let plan = Plan {
        dom_texts: texts(&["3.10x"]),
        ..Plan::default()
    };
    let (page, _) = FakePage::new(plan);
    let sink = MemorySink::failing(1);
    let mut run = RunState::default();
    let settings = poll_settings();

    let first = poll_once(&page, &sink, &settings, &mut run).await.unwrap();
    assert_eq!(first.written, 0);
    assert_eq!(run.write_failures, 1);
    assert_eq!(run.dom.last(), None);

    // The value was never stored, so the next sighting is still new.
    let second = poll_once(&page, &sink, &settings, &mut run).await.unwrap();
    assert!(second.dom_written);
    assert_eq!(sink.rounds().len(), 1);
    assert_eq!(run.rounds_written, 1);
}

#[tokio::test]
async fn page_errors_are_absorbed() {
    let plan = Plan {
        drains: VecDeque::from([Err(BrowserError::Evaluation("ReferenceError".into()))]),
        dom_texts: texts(&["4.20x"]),
        ..Plan::default()
    };
    let (page, _) = FakePage::new(plan);
    let sink = MemorySink::default();
    let mut run = RunState::default();

    let report = poll_once(&page, &sink, &poll_settings(), &mut run).await.unwrap();

    assert_eq!(report.transient_errors, 1);
    assert_eq!(report.events, 0);
    assert!(report.dom_written);
}

#[tokio::test]
async fn lost_browser_ends_the_tick() {
    let plan = Plan {
        crash_on_drain: Some(1),
        dom_texts: texts(&["4.20x"]),
        ..Plan::default()
    };
    let (page, journal) = FakePage::new(plan);
    let sink = MemorySink::default();
    let mut run = RunState::default();

    let err = poll_once(&page, &sink, &poll_settings(), &mut run)
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(sink.rounds().is_empty());
    assert_eq!(journal.lock().unwrap().count(ScriptKind::VisibleText), 0);
}

#[tokio::test]
async fn unparsed_messages_are_kept_only_when_asked() {
    let event = json!([{ "source": "xhr", "raw": "{\"balance\":12}", "parsed": {"balance": 12} }]);

    let (page, _) = FakePage::new(Plan {
        drains: VecDeque::from([Ok(event.clone())]),
        ..Plan::default()
    });
    let sink = MemorySink::default();
    poll_once(&page, &sink, &poll_settings(), &mut RunState::default())
        .await
        .unwrap();
    assert!(sink.rounds().is_empty());

    let (page, _) = FakePage::new(Plan {
        drains: VecDeque::from([Ok(event)]),
        ..Plan::default()
    });
    let mut settings = poll_settings();
    settings.keep_unparsed = true;
    let sink = MemorySink::default();
    poll_once(&page, &sink, &settings, &mut RunState::default())
        .await
        .unwrap();

    let rounds = sink.rounds();
    assert_eq!(rounds.len(), 1);
    assert_eq!(rounds[0].value, None);
    assert_eq!(rounds[0].source, RoundSource::Http);
    assert_eq!(rounds[0].raw.as_deref(), Some("{\"balance\":12}"));
}
