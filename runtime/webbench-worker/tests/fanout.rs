mod common;

use std::thread;
use std::time::Duration;

use common::{stub_movie_query, stub_user_query, StubStats, StubStore};
use webbench_worker::model::{Movie, User};
use webbench_worker::{build, BenchError, Worker, WorkerConfig};

fn stub_worker(kind: &str, query: &str, concurrency: usize) -> (Worker, std::sync::Arc<StubStats>) {
    let (store, stats) = StubStore::new();
    let config = WorkerConfig::new(query, concurrency).with_kind(kind);
    let worker = build(Box::new(store), &config).expect("build");
    (worker, stats)
}

#[test]
fn duration_covers_the_slowest_sub_query() {
    let (worker, _) = stub_worker("movie", &stub_movie_query([80, 5, 5, 5]), 1);
    let measurement = worker.invoke("k1").expect("invoke");
    assert!(measurement.duration >= Duration::from_millis(80));
    worker.close().expect("close");
}

#[test]
fn sub_queries_run_in_parallel() {
    let (worker, _) = stub_worker("movie", &stub_movie_query([150, 150, 150, 150]), 1);
    let measurement = worker.invoke("k1").expect("invoke");
    assert!(measurement.duration >= Duration::from_millis(150));
    assert!(
        measurement.duration < Duration::from_millis(450),
        "took {:?}",
        measurement.duration
    );
    worker.close().expect("close");
}

#[test]
fn flattened_shape_covers_its_single_query() {
    let (worker, stats) = stub_worker("users", &stub_user_query(40), 1);
    let measurement = worker.invoke("u1").expect("invoke");
    assert!(measurement.duration >= Duration::from_millis(40));
    assert_eq!(StubStats::get(&stats.executed), 1);

    let user: User = serde_json::from_str(&measurement.payload).expect("user payload");
    assert_eq!(user.detail.id, "users:u1:2:0");
    assert_eq!(user.latest_reviews.len(), 3);
    assert_eq!(user.latest_reviews[2].movie.title, "users:u1:2:8");
    worker.close().expect("close");
}

#[test]
fn every_field_is_written_by_its_own_sub_query() {
    let (worker, _) = stub_worker("movie", &stub_movie_query([20, 5, 15, 10]), 2);
    for key in ["a", "b", "a"] {
        let movie: Movie =
            serde_json::from_str(&worker.invoke(key).expect("invoke").payload).expect("payload");
        // First detail row wins.
        assert_eq!(movie.detail.id, format!("detail:{key}:0:0"));
        assert_eq!(movie.detail.title, format!("detail:{key}:0:2"));
        assert_eq!(movie.detail.year, 1);
        assert_eq!(movie.detail.avg_rating, 0.5);

        assert_eq!(movie.directors.len(), 2);
        assert_eq!(movie.cast.len(), 3);
        assert_eq!(movie.reviews.len(), 2);
        for (row, director) in movie.directors.iter().enumerate() {
            assert_eq!(director.id, format!("directors:{key}:{row}:0"));
        }
        for (row, actor) in movie.cast.iter().enumerate() {
            assert_eq!(actor.full_name, format!("cast:{key}:{row}:1"));
        }
        for (row, review) in movie.reviews.iter().enumerate() {
            assert_eq!(review.rating, row as i64 + 1);
            assert_eq!(review.author.image, format!("reviews:{key}:{row}:5"));
        }
    }
    worker.close().expect("close");
}

#[test]
fn concurrent_calls_see_only_their_key() {
    let (worker, stats) = stub_worker("movie", &stub_movie_query([3, 1, 2, 1]), 4);
    thread::scope(|scope| {
        for client in 0..6 {
            let worker = &worker;
            scope.spawn(move || {
                let key = format!("client{client}");
                for _ in 0..10 {
                    let payload = worker.invoke(&key).expect("invoke").payload;
                    let movie: Movie = serde_json::from_str(&payload).expect("payload");
                    let prefix = |label: &str| format!("{label}:{key}:");
                    assert!(movie.detail.id.starts_with(&prefix("detail")));
                    assert!(movie.directors.iter().all(|p| p.id.starts_with(&prefix("directors"))));
                    assert!(movie.cast.iter().all(|p| p.id.starts_with(&prefix("cast"))));
                    assert!(movie.reviews.iter().all(|r| r.id.starts_with(&prefix("reviews"))));
                }
            });
        }
    });
    assert_eq!(StubStats::get(&stats.executed), 6 * 10 * 4);
    worker.close().expect("close");
}

#[test]
fn failed_sub_query_is_fatal_to_the_call_only() {
    let (worker, _) = stub_worker("movie", &stub_movie_query([1, 1, 1, 1]), 1);
    let err = worker.invoke("boom").err().expect("store failure");
    assert!(matches!(err, BenchError::QueryExecution(_)), "{err}");

    // The record is reused and must come back clean.
    let movie: Movie =
        serde_json::from_str(&worker.invoke("ok").expect("invoke").payload).expect("payload");
    assert_eq!(movie.directors.len(), 2);
    assert!(movie.reviews.iter().all(|r| r.id.starts_with("reviews:ok:")));
    worker.close().expect("close");
}

#[test]
fn queries_are_prepared_once_and_closed_on_teardown() {
    let (worker, stats) = stub_worker("movie", &stub_movie_query([1, 1, 1, 1]), 2);
    assert_eq!(StubStats::get(&stats.prepared), 4);
    for key in ["a", "b", "c"] {
        worker.invoke(key).expect("invoke");
    }
    assert_eq!(StubStats::get(&stats.prepared), 4);
    assert_eq!(StubStats::get(&stats.closed_queries), 0);

    worker.close().expect("close");
    assert_eq!(StubStats::get(&stats.closed_queries), 4);
    assert_eq!(StubStats::get(&stats.closed_stores), 1);
}

#[test]
fn store_is_closed_even_when_a_query_close_fails() {
    let query = "detail tttitr 1 0; stuck ttt 1 0; cast ttt 1 0; stuck ttittt 1 0";
    let (worker, stats) = stub_worker("movie", query, 1);
    worker.invoke("k1").expect("invoke");

    let err = worker.close().err().expect("teardown failure");
    assert!(matches!(&err, BenchError::Teardown(msg) if msg.contains("stuck")), "{err}");
    assert_eq!(StubStats::get(&stats.closed_queries), 4);
    assert_eq!(StubStats::get(&stats.closed_stores), 1);
}

#[test]
fn prepare_error_survives_a_failed_release() {
    let (store, stats) = StubStore::new();
    let query = "stuck tttitr 1 0; directors ttt 1 0; cast; reviews ttittt 1 0";
    let config = WorkerConfig::new(query, 1).with_kind("movie");
    let err = build(Box::new(store), &config).err().expect("prepare failure");
    assert!(matches!(err, BenchError::Prepare { .. }), "{err}");
    assert_eq!(StubStats::get(&stats.closed_queries), 2);
}

#[test]
fn prepare_failure_releases_earlier_queries() {
    let (store, stats) = StubStore::new();
    let query = "detail tttitr 1 0; directors ttt 1 0; cast; reviews ttittt 1 0";
    let config = WorkerConfig::new(query, 1).with_kind("movie");
    let err = build(Box::new(store), &config).err().expect("prepare failure");
    assert!(matches!(err, BenchError::Prepare { .. }), "{err}");
    assert_eq!(StubStats::get(&stats.prepared), 2);
    assert_eq!(StubStats::get(&stats.closed_queries), 2);
}
