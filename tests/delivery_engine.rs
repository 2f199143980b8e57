//! Integration tests for the delivery engine.
//!
//! A scripted stub gateway records every call with the (paused) tokio clock,
//! so ordering, waits and the circuit breaker can be checked exactly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use quizcast::config::DeliveryConfig;
use quizcast::delivery::DeliveryEngine;
use quizcast::error::{DatabaseError, GatewayError};
use quizcast::gateway::{MessagingGateway, PollAck, PollRequest};
use quizcast::jobs::{Job, JobStatus, PrivacyMode, Target};
use uuid::Uuid;
use quizcast::parser::parse;
use quizcast::store::{JobStore, MemoryStore};

const OWNER: i64 = 1;
const CHAT: i64 = -100;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Text { chat: i64, text: String },
    Poll { chat: i64, poll: PollRequest },
    Reply { chat: i64, text: String, to: i64 },
}

/// What the stub does on one call.
enum Step {
    Ok,
    Fail(GatewayError),
    Hang,
}

#[derive(Default)]
struct StubGateway {
    polls: Mutex<VecDeque<Step>>,
    texts: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(Instant, Call)>>,
}

impl StubGateway {
    fn with_polls(steps: Vec<Step>) -> Self {
        Self {
            polls: Mutex::new(steps.into()),
            ..Default::default()
        }
    }

    fn with_texts(steps: Vec<Step>) -> Self {
        Self {
            texts: Mutex::new(steps.into()),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    fn poll_times(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| matches!(c, Call::Poll { .. }))
            .map(|(t, _)| *t)
            .collect()
    }

    fn owner_messages(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Text { chat, text } if chat == OWNER => Some(text),
                _ => None,
            })
            .collect()
    }

    fn chat_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Text { chat, .. } if *chat == OWNER))
            .collect()
    }

    async fn run(&self, script: &Mutex<VecDeque<Step>>, call: Call) -> Result<i64, GatewayError> {
        let step = script.lock().unwrap().pop_front().unwrap_or(Step::Ok);
        let id = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((Instant::now(), call));
            calls.len() as i64
        };
        match step {
            Step::Ok => Ok(id),
            Step::Fail(e) => Err(e),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

#[async_trait]
impl MessagingGateway for StubGateway {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), GatewayError> {
        let call = Call::Text {
            chat: chat_id,
            text: text.to_string(),
        };
        if chat_id == OWNER {
            self.calls.lock().unwrap().push((Instant::now(), call));
            return Ok(());
        }
        self.run(&self.texts, call).await.map(|_| ())
    }

    async fn create_poll(&self, chat_id: i64, poll: &PollRequest) -> Result<PollAck, GatewayError> {
        let call = Call::Poll {
            chat: chat_id,
            poll: poll.clone(),
        };
        let id = self.run(&self.polls, call).await?;
        Ok(PollAck {
            poll_id: format!("poll-{id}"),
            message_id: id,
        })
    }

    async fn send_reply(&self, chat_id: i64, text: &str, poll: &PollAck) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push((
            Instant::now(),
            Call::Reply {
                chat: chat_id,
                text: text.to_string(),
                to: poll.message_id,
            },
        ));
        Ok(())
    }

    fn inline_explanation_limit(&self) -> Option<usize> {
        Some(200)
    }
}

fn question(n: usize) -> String {
    format!("Q: question {n}?\nA: one\nB: two\nC: three\nD: four\nANS: B\n")
}

fn questions(count: usize) -> String {
    (1..=count).map(question).collect()
}

async fn queued_job(store: &MemoryStore, text: &str) -> Job {
    let result = parse(text);
    assert!(result.ok, "{}", result.report());
    let mut job = Job::from_parse(OWNER, &result).unwrap();
    job.privacy_mode = Some(PrivacyMode::Public);
    job.target = Some(Target::new("Class", CHAT));
    job.status = JobStatus::Queued;
    store.save(&job).await.unwrap();
    job
}

fn engine(store: &Arc<MemoryStore>, gateway: &Arc<StubGateway>) -> DeliveryEngine {
    engine_with(store, gateway, DeliveryConfig::default())
}

fn engine_with(
    store: &Arc<MemoryStore>,
    gateway: &Arc<StubGateway>,
    config: DeliveryConfig,
) -> DeliveryEngine {
    DeliveryEngine::new(
        Arc::clone(store) as Arc<dyn JobStore>,
        Arc::clone(gateway) as Arc<dyn MessagingGateway>,
        config,
    )
}

async fn status(store: &MemoryStore, job: &Job) -> JobStatus {
    store.load(job.id).await.unwrap().unwrap().status
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[tokio::test(start_paused = true)]
async fn items_are_posted_in_sequence_order() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(StubGateway::default());
    let text = format!("DES: welcome\n{}DES: halfway\n{}DES: bye", question(1), question(2));
    let job = queued_job(&store, &text).await;

    let outcome = engine(&store, &gateway).deliver(job.id).await.unwrap().unwrap();
    assert_eq!(outcome.delivered_count, 5);
    assert_eq!(outcome.total_count, 5);
    assert!(!outcome.aborted);

    let posted: Vec<String> = gateway
        .chat_calls()
        .into_iter()
        .map(|c| match c {
            Call::Text { text, .. } => text,
            Call::Poll { poll, .. } => poll.question,
            Call::Reply { text, .. } => text,
        })
        .collect();
    assert_eq!(
        posted,
        vec!["welcome", "question 1?", "halfway", "question 2?", "bye"]
    );
    assert_eq!(status(&store, &job).await, JobStatus::Completed);
    assert_eq!(store.load(job.id).await.unwrap().unwrap().delivered_count, 5);

    let notes = gateway.owner_messages();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].starts_with("✅"));
}

#[tokio::test(start_paused = true)]
async fn poll_carries_quiz_fields() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(StubGateway::default());
    let mut job = queued_job(
        &store,
        "Q: Capital of France?\nA: Rome\nB: Madrid\nC: Paris\nD: Berlin\nANS: C\nEXP: Paris it is",
    )
    .await;
    job.privacy_mode = Some(PrivacyMode::Anonymous);
    store.save(&job).await.unwrap();

    engine(&store, &gateway).deliver(job.id).await.unwrap().unwrap();

    let Call::Poll { chat, poll } = &gateway.chat_calls()[0] else {
        panic!("expected a poll");
    };
    assert_eq!(*chat, CHAT);
    assert_eq!(poll.options, vec!["Rome", "Madrid", "Paris", "Berlin"]);
    assert_eq!(poll.correct_option_id, 2);
    assert!(poll.is_anonymous);
    assert_eq!(poll.explanation.as_deref(), Some("Paris it is"));
}

#[tokio::test(start_paused = true)]
async fn long_explanation_follows_as_reply() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(StubGateway::default());
    let long = "x".repeat(250);
    let job = queued_job(&store, &format!("{}EXP: {long}", question(1))).await;

    engine(&store, &gateway).deliver(job.id).await.unwrap().unwrap();

    let calls = gateway.chat_calls();
    assert_eq!(calls.len(), 2);
    let Call::Poll { poll, .. } = &calls[0] else {
        panic!("expected a poll first");
    };
    assert_eq!(poll.explanation, None);
    let Call::Reply { text, to, .. } = &calls[1] else {
        panic!("expected a reply second");
    };
    assert!(text.contains(&long));
    assert_eq!(*to, 1);
}

#[tokio::test(start_paused = true)]
async fn breaker_aborts_on_third_consecutive_failure() {
    let store = Arc::new(MemoryStore::new());
    let rejected = || Step::Fail(GatewayError::Permanent("Bad Request".into()));
    let gateway = Arc::new(StubGateway::with_polls(vec![
        Step::Ok,
        rejected(),
        rejected(),
        rejected(),
    ]));
    let job = queued_job(&store, &questions(6)).await;

    let outcome = engine(&store, &gateway).deliver(job.id).await.unwrap().unwrap();
    assert!(outcome.aborted);
    assert_eq!(outcome.failing_item_index, Some(3));
    assert_eq!(outcome.delivered_count, 1);
    assert_eq!(outcome.failed_items, vec![1, 2, 3]);

    // Nothing after the tripping item was attempted.
    assert_eq!(gateway.poll_times().len(), 4);
    assert_eq!(status(&store, &job).await, JobStatus::Aborted);

    let notes = gateway.owner_messages();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].contains("aborted"));
    assert!(notes[0].contains("item 4"));
}

#[tokio::test(start_paused = true)]
async fn success_resets_the_breaker() {
    let store = Arc::new(MemoryStore::new());
    let rejected = || Step::Fail(GatewayError::Permanent("Bad Request".into()));
    let gateway = Arc::new(StubGateway::with_polls(vec![
        rejected(),
        rejected(),
        Step::Ok,
        rejected(),
        rejected(),
        Step::Ok,
    ]));
    let job = queued_job(&store, &questions(6)).await;

    let outcome = engine(&store, &gateway).deliver(job.id).await.unwrap().unwrap();
    assert!(!outcome.aborted);
    assert_eq!(outcome.failed_items, vec![0, 1, 3, 4]);
    assert_eq!(outcome.delivered_count, 2);
    assert_eq!(status(&store, &job).await, JobStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_wait_is_honored_without_consuming_attempts() {
    let store = Arc::new(MemoryStore::new());
    let limited = || {
        Step::Fail(GatewayError::RateLimited {
            retry_after: secs(5),
        })
    };
    // More rate-limit signals than the attempt ceiling.
    let mut steps: Vec<Step> = (0..6).map(|_| limited()).collect();
    steps.push(Step::Ok);
    let gateway = Arc::new(StubGateway::with_polls(steps));
    let job = queued_job(&store, &questions(1)).await;

    let outcome = engine(&store, &gateway).deliver(job.id).await.unwrap().unwrap();
    assert_eq!(outcome.delivered_count, 1);
    assert!(outcome.failed_items.is_empty());

    let times = gateway.poll_times();
    assert_eq!(times.len(), 7);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= secs(6), "waited {:?}", pair[1] - pair[0]);
    }
    assert_eq!(status(&store, &job).await, JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_back_off_exponentially() {
    let store = Arc::new(MemoryStore::new());
    let flaky = || Step::Fail(GatewayError::Transient("connection reset".into()));
    let gateway = Arc::new(StubGateway::with_polls(vec![flaky(), flaky(), flaky(), Step::Ok]));
    let job = queued_job(&store, &questions(1)).await;

    let outcome = engine(&store, &gateway).deliver(job.id).await.unwrap().unwrap();
    assert_eq!(outcome.delivered_count, 1);

    let times = gateway.poll_times();
    assert_eq!(times.len(), 4);
    assert!(times[1] - times[0] >= secs(2));
    assert!(times[2] - times[1] >= secs(4));
    assert!(times[3] - times[2] >= secs(8));
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_fail_the_question_only() {
    let store = Arc::new(MemoryStore::new());
    let flaky = || Step::Fail(GatewayError::Transient("503".into()));
    let gateway = Arc::new(StubGateway::with_polls(vec![flaky(), flaky(), flaky(), flaky()]));
    let job = queued_job(&store, &questions(2)).await;

    let outcome = engine(&store, &gateway).deliver(job.id).await.unwrap().unwrap();
    assert_eq!(outcome.failed_items, vec![0]);
    assert_eq!(outcome.delivered_count, 1);
    // Four attempts on the first question, one on the second.
    assert_eq!(gateway.poll_times().len(), 5);
    assert_eq!(status(&store, &job).await, JobStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn hung_call_times_out_as_transient() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(StubGateway::with_polls(vec![Step::Hang, Step::Ok]));
    let job = queued_job(&store, &questions(1)).await;
    let config = DeliveryConfig {
        call_timeout: secs(20),
        ..DeliveryConfig::default()
    };

    let outcome = engine_with(&store, &gateway, config)
        .deliver(job.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.delivered_count, 1);
    let times = gateway.poll_times();
    assert!(times[1] - times[0] >= secs(22));
}

#[tokio::test(start_paused = true)]
async fn pacing_spaces_consecutive_polls() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(StubGateway::default());
    let job = queued_job(&store, &questions(3)).await;

    engine(&store, &gateway).deliver(job.id).await.unwrap().unwrap();
    let times = gateway.poll_times();
    assert!(times[1] - times[0] >= secs(1));
    assert!(times[2] - times[1] >= secs(1));
}

#[tokio::test(start_paused = true)]
async fn large_jobs_use_long_pacing() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(StubGateway::default());
    let job = queued_job(&store, &questions(3)).await;
    let config = DeliveryConfig {
        pacing_threshold: 2,
        ..DeliveryConfig::default()
    };

    engine_with(&store, &gateway, config)
        .deliver(job.id)
        .await
        .unwrap()
        .unwrap();
    let times = gateway.poll_times();
    assert!(times[1] - times[0] >= secs(2));
    assert!(times[2] - times[1] >= secs(2));
}

#[tokio::test(start_paused = true)]
async fn announcement_failure_is_not_critical() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(StubGateway::with_texts(vec![Step::Fail(
        GatewayError::Transient("reset".into()),
    )]));
    let job = queued_job(&store, &format!("DES: hello\n{}", questions(2))).await;

    let outcome = engine(&store, &gateway).deliver(job.id).await.unwrap().unwrap();
    assert_eq!(outcome.delivered_count, 2);
    assert_eq!(outcome.total_count, 3);
    assert!(outcome.failed_items.is_empty());
    assert!(!outcome.aborted);
    // Single attempt for the announcement.
    let texts = gateway
        .chat_calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Text { .. }))
        .count();
    assert_eq!(texts, 1);
    assert_eq!(status(&store, &job).await, JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn second_invocation_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(StubGateway::default());
    let job = queued_job(&store, &questions(2)).await;
    let engine = engine(&store, &gateway);

    assert!(engine.deliver(job.id).await.unwrap().is_some());
    assert!(engine.deliver(job.id).await.unwrap().is_none());

    assert_eq!(gateway.poll_times().len(), 2);
    assert_eq!(gateway.owner_messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_invocations_deliver_once() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(StubGateway::default());
    let job = queued_job(&store, &questions(2)).await;
    let engine = Arc::new(engine(&store, &gateway));

    let (a, b) = tokio::join!(engine.deliver(job.id), engine.deliver(job.id));
    let claimed = [a.unwrap(), b.unwrap()].into_iter().flatten().count();
    assert_eq!(claimed, 1);
    assert_eq!(gateway.poll_times().len(), 2);
    assert_eq!(gateway.owner_messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn jobs_not_queued_are_left_alone() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(StubGateway::default());
    let job = queued_job(&store, &questions(1)).await;
    store.update_status(job.id, JobStatus::Cancelled).await.unwrap();

    assert!(engine(&store, &gateway).deliver(job.id).await.unwrap().is_none());
    assert!(gateway.calls().is_empty());
    assert_eq!(status(&store, &job).await, JobStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn spawned_jobs_run_independently() {
    let store = Arc::new(MemoryStore::new());
    let limited = Step::Fail(GatewayError::RateLimited {
        retry_after: secs(30),
    });
    let gateway = Arc::new(StubGateway::with_polls(vec![limited]));
    let slow = queued_job(&store, &questions(1)).await;
    let engine = Arc::new(engine(&store, &gateway));

    let first = engine.spawn(slow.id);
    // Let the first job hit its rate-limit wait before queueing the second.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let fast = queued_job(&store, &questions(1)).await;
    let started = Instant::now();
    engine.deliver(fast.id).await.unwrap().unwrap();
    assert!(Instant::now() - started < secs(30));
    assert_eq!(status(&store, &slow).await, JobStatus::Running);

    first.await.unwrap();
    assert_eq!(status(&store, &slow).await, JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn recovery_fails_interrupted_and_resumes_queued() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(StubGateway::default());
    let interrupted = queued_job(&store, &questions(2)).await;
    store.update_status(interrupted.id, JobStatus::Running).await.unwrap();
    store.update_progress(interrupted.id, 1).await.unwrap();
    let waiting = queued_job(&store, &questions(1)).await;

    let engine = engine(&store, &gateway);
    let resumed = engine.recover().await.unwrap();
    assert_eq!(resumed, vec![waiting.id]);
    assert_eq!(status(&store, &interrupted).await, JobStatus::Failed);
    assert_eq!(status(&store, &waiting).await, JobStatus::Queued);

    let notes = gateway.owner_messages();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].contains("interrupted"));
    assert!(gateway.poll_times().is_empty());
}

/// Memory store whose `running → terminal` writes fail a set number of times.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    terminal_failures: AtomicUsize,
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn save(&self, job: &Job) -> Result<(), DatabaseError> {
        self.inner.save(job).await
    }

    async fn load(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        self.inner.load(id).await
    }

    async fn update_status(&self, id: Uuid, status: JobStatus) -> Result<(), DatabaseError> {
        self.inner.update_status(id, status).await
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, DatabaseError> {
        self.inner.list_by_status(status).await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, DatabaseError> {
        if from == JobStatus::Running
            && self
                .terminal_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(DatabaseError::Query("database is locked".into()));
        }
        self.inner.transition_status(id, from, to).await
    }

    async fn update_progress(&self, id: Uuid, delivered_count: usize) -> Result<(), DatabaseError> {
        self.inner.update_progress(id, delivered_count).await
    }
}

fn flaky_engine(
    store: &Arc<MemoryStore>,
    gateway: &Arc<StubGateway>,
    terminal_failures: usize,
) -> DeliveryEngine {
    let flaky = FlakyStore {
        inner: Arc::clone(store),
        terminal_failures: AtomicUsize::new(terminal_failures),
    };
    DeliveryEngine::new(
        Arc::new(flaky) as Arc<dyn JobStore>,
        Arc::clone(gateway) as Arc<dyn MessagingGateway>,
        DeliveryConfig::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn terminal_status_write_is_retried() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(StubGateway::default());
    let job = queued_job(&store, &questions(1)).await;

    let outcome = flaky_engine(&store, &gateway, 1).deliver(job.id).await.unwrap();
    assert!(outcome.is_some());
    assert_eq!(status(&store, &job).await, JobStatus::Completed);
    assert_eq!(gateway.owner_messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn owner_hears_the_summary_when_status_cannot_be_recorded() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(StubGateway::default());
    let job = queued_job(&store, &questions(1)).await;

    let result = flaky_engine(&store, &gateway, 2).deliver(job.id).await;
    assert!(result.is_err());
    assert_eq!(status(&store, &job).await, JobStatus::Running);
    let notes = gateway.owner_messages();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].contains("delivered to Class"));
}
