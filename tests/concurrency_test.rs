mod common;

use common::{client_ciphertext, harness};
use futures_util::future::join_all;
use pqc_stepup::identity::SubjectId;
use pqc_stepup::session::PqcError;

const RACERS: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_completions_yield_one_session() {
    let h = harness();
    let u1 = SubjectId::from("u1");

    let init = h.protocol.handshake_init(&u1, None).await.unwrap();
    let (ciphertext, _) = client_ciphertext(&init);

    let tasks = (0..RACERS).map(|_| {
        let protocol = h.protocol.clone();
        let subject = u1.clone();
        let handshake_id = init.handshake_id.clone();
        let ciphertext = ciphertext.clone();
        tokio::spawn(async move {
            protocol
                .handshake_complete(&subject, &handshake_id, &ciphertext)
                .await
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let completed = results.iter().filter(|r| r.is_ok()).count();
    let not_found = results
        .iter()
        .filter(|r| matches!(r, Err(PqcError::NotFound)))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(not_found, RACERS - 1);
    assert_eq!(h.kem.decapsulate_calls(), 1);
    assert_eq!(h.protocol.stats().await.unwrap().active_sessions, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_subjects_do_not_interfere() {
    let h = harness();

    let tasks = (0..RACERS).map(|i| {
        let protocol = h.protocol.clone();
        tokio::spawn(async move {
            let subject = SubjectId::new(format!("user-{}", i));
            let init = protocol.handshake_init(&subject, None).await.unwrap();
            let (ciphertext, _) = client_ciphertext(&init);
            let completion = protocol
                .handshake_complete(&subject, &init.handshake_id, &ciphertext)
                .await
                .unwrap();
            protocol
                .validate_session(&subject, &completion.session_id)
                .await
                .map(|session| session.subject_id == subject)
        })
    });

    for joined in join_all(tasks).await {
        assert!(joined.unwrap().unwrap());
    }
    let stats = h.protocol.stats().await.unwrap();
    assert_eq!(stats.active_sessions, RACERS);
    assert_eq!(stats.pending_handshakes, 0);
    assert_eq!(h.kem.keygen_calls(), RACERS);
}
