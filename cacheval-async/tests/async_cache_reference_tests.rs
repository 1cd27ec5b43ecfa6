/// Integration tests for `#[async_cache_reference]`
use cacheval_async::{async_cache_reference, CacheValueError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Session {
    repo: String,
}

static SESSIONS_OPENED: AtomicUsize = AtomicUsize::new(0);

#[async_cache_reference]
async fn get_client_session(repo: String) -> Arc<Session> {
    SESSIONS_OPENED.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(20)).await;
    Arc::new(Session { repo })
}

#[tokio::test]
async fn test_one_session_per_repo() {
    let a = get_client_session("dummy".to_string()).await.unwrap();
    let b = get_client_session("dummy".to_string()).await.unwrap();
    let c = get_client_session("other".to_string()).await.unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(c.repo, "other");
    assert_eq!(SESSIONS_OPENED.load(Ordering::SeqCst), 2);
}

static MODEL_LOADS: AtomicUsize = AtomicUsize::new(0);

#[async_cache_reference(name = "shared_model")]
async fn load_model() -> Arc<Vec<f32>> {
    MODEL_LOADS.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    Arc::new(vec![0.5; 16])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_callers_await_one_load() {
    let tasks: Vec<_> = (0..8).map(|_| tokio::spawn(load_model())).collect();

    let mut models = Vec::new();
    for task in tasks {
        models.push(task.await.unwrap().unwrap());
    }

    assert_eq!(MODEL_LOADS.load(Ordering::SeqCst), 1);
    assert!(models.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[derive(Debug)]
enum OpenError {
    Timeout,
    Cache(CacheValueError),
}

impl From<CacheValueError> for OpenError {
    fn from(err: CacheValueError) -> Self {
        OpenError::Cache(err)
    }
}

static OPEN_ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

#[async_cache_reference]
async fn open_channel(endpoint: &str) -> Result<Arc<String>, OpenError> {
    if OPEN_ATTEMPTS.fetch_add(1, Ordering::SeqCst) == 0 {
        return Err(OpenError::Timeout);
    }
    Ok(Arc::new(endpoint.to_uppercase()))
}

#[tokio::test]
async fn test_failed_creation_is_retried() {
    assert!(matches!(open_channel("grpc").await, Err(OpenError::Timeout)));

    let first = open_channel("grpc").await.unwrap();
    let second = open_channel("grpc").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.as_str(), "GRPC");
    assert_eq!(OPEN_ATTEMPTS.load(Ordering::SeqCst), 2);
}

struct Socket;

#[async_cache_reference]
async fn session_over(sock: &Socket) -> Arc<u8> {
    let _ = sock;
    Arc::new(1)
}

#[tokio::test]
async fn test_unhashable_argument_fails() {
    let err = session_over(&Socket).await.unwrap_err();
    assert!(matches!(err, CacheValueError::UnhashableParam { .. }));
}
