use crate::*;

use hangman_player::Refusal;

/// Filling a match starts it: the master is told first, then the guessers
/// once the master hands off. The registry forgets the match but the
/// channel stays leased.
#[tokio::test]
async fn full_match_starts_everyone_on_one_channel() {
    let daemon = Daemon::start(test_config(2)).await;
    let (host, guessers) = form_match(&daemon, "bob", &["amy", "cid"]).await;

    assert_eq!(host.identity, "bob");
    assert_eq!(guessers.len(), 2);
    for g in &guessers {
        assert_eq!(g.channel, host.channel);
    }

    let ctx = Arc::clone(&daemon.ctx);
    wait_until("registry to drop the started match", || {
        let ctx = Arc::clone(&ctx);
        async move { ctx.registry.is_empty().await }
    })
    .await;
    assert_eq!(daemon.channels_in_use(), 1);
}

#[tokio::test]
async fn master_can_start_early() {
    let daemon = Daemon::start(test_config(2)).await;

    let mut host = daemon.master("bob", 3).await;
    let HandshakeEvent::MatchCreated(channel) = next_event(&mut host).await else {
        panic!("match not created");
    };
    let mut amy = daemon.guesser("amy", "bob").await;
    assert_eq!(next_event(&mut amy).await, HandshakeEvent::AddedToMatch);

    // Early start uses the channel announced at creation.
    assert_eq!(host.channel(), Some(&channel));
    host.handoff(channel.clone()).await.unwrap();

    assert_eq!(next_event(&mut amy).await, HandshakeEvent::Start(channel));
}

#[tokio::test]
async fn master_exit_closes_the_match_for_guessers() {
    let daemon = Daemon::start(test_config(2)).await;

    let mut host = daemon.master("bob", 2).await;
    assert!(matches!(next_event(&mut host).await, HandshakeEvent::MatchCreated(_)));
    let mut amy = daemon.guesser("amy", "bob").await;
    assert_eq!(next_event(&mut amy).await, HandshakeEvent::AddedToMatch);

    host.exit().await.unwrap();
    assert_eq!(next_event(&mut amy).await, HandshakeEvent::MatchClosed);

    daemon.wait_for_channels_in_use(0).await;
}

#[tokio::test]
async fn master_disconnect_is_handled_like_exit() {
    let daemon = Daemon::start(test_config(2)).await;

    let mut host = daemon.master("bob", 2).await;
    assert!(matches!(next_event(&mut host).await, HandshakeEvent::MatchCreated(_)));
    let mut amy = daemon.guesser("amy", "bob").await;
    assert_eq!(next_event(&mut amy).await, HandshakeEvent::AddedToMatch);

    drop(host);
    assert_eq!(next_event(&mut amy).await, HandshakeEvent::MatchClosed);
}

#[tokio::test]
async fn joining_unknown_or_full_matches_is_refused() {
    let daemon = Daemon::start(test_config(2)).await;

    let mut lost = daemon.guesser("amy", "nobody").await;
    assert_eq!(
        next_event(&mut lost).await,
        HandshakeEvent::Refused(Refusal::MasterDoesntExist)
    );

    let mut host = daemon.master("bob", 1).await;
    assert!(matches!(next_event(&mut host).await, HandshakeEvent::MatchCreated(_)));
    let mut cid = daemon.guesser("cid", "bob").await;
    assert_eq!(next_event(&mut cid).await, HandshakeEvent::AddedToMatch);
    assert!(matches!(next_event(&mut host).await, HandshakeEvent::Start(_)));

    // The master has not handed off yet; the match is full, not closed.
    let mut late = daemon.guesser("dee", "bob").await;
    assert_eq!(
        next_event(&mut late).await,
        HandshakeEvent::Refused(Refusal::MatchFull)
    );
}

#[tokio::test]
async fn guesser_exit_frees_its_place() {
    let daemon = Daemon::start(test_config(2)).await;

    let mut host = daemon.master("bob", 1).await;
    assert!(matches!(next_event(&mut host).await, HandshakeEvent::MatchCreated(_)));

    let mut amy = daemon.guesser("amy", "bob").await;
    assert_eq!(next_event(&mut amy).await, HandshakeEvent::AddedToMatch);
    // Capacity 1: the join alone starts the match.
    assert!(matches!(next_event(&mut host).await, HandshakeEvent::Start(_)));
    amy.exit().await.unwrap();

    let ctx = Arc::clone(&daemon.ctx);
    wait_until("amy to leave the match", || {
        let ctx = Arc::clone(&ctx);
        async move {
            match ctx.registry.lookup("bob").await {
                Some(m) => m.joined().await == 0,
                None => false,
            }
        }
    })
    .await;
}

#[tokio::test]
async fn duplicate_identity_is_turned_away() {
    let daemon = Daemon::start(test_config(2)).await;

    let mut first = daemon.master("bob", 2).await;
    assert!(matches!(next_event(&mut first).await, HandshakeEvent::MatchCreated(_)));

    let mut second = daemon.guesser("bob", "bob").await;
    match second.next_event().await {
        Ok(HandshakeEvent::ServerGone) | Err(_) => {}
        other => panic!("duplicate identity was served: {other:?}"),
    }

    // The first connection is unaffected.
    let mut amy = daemon.guesser("amy", "bob").await;
    assert_eq!(next_event(&mut amy).await, HandshakeEvent::AddedToMatch);
}

#[tokio::test]
async fn listing_shows_open_matches() {
    let daemon = Daemon::start(test_config(2)).await;

    let mut host = daemon.master("bob", 3).await;
    assert!(matches!(next_event(&mut host).await, HandshakeEvent::MatchCreated(_)));

    let mut amy = daemon.guesser("amy", "bob").await;
    let HandshakeEvent::Listing(matches) = amy.next_event().await.unwrap() else {
        panic!("HELLO is answered with a listing");
    };
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].to_string(), "0/3, master: bob");
}

/// A full registry turns masters away until a match is removed, and then
/// has room for exactly one more.
#[tokio::test]
async fn scenario_e_full_registry_makes_room_after_removal() {
    let daemon = Daemon::start(test_config(1)).await;

    let mut first = daemon.master("m1", 2).await;
    assert!(matches!(next_event(&mut first).await, HandshakeEvent::MatchCreated(_)));

    let mut refused = daemon.master("m2", 2).await;
    assert_eq!(
        next_event(&mut refused).await,
        HandshakeEvent::Refused(Refusal::NoMoreMatch)
    );

    first.exit().await.unwrap();
    let ctx = Arc::clone(&daemon.ctx);
    wait_until("the first match to be removed", || {
        let ctx = Arc::clone(&ctx);
        async move { ctx.registry.is_empty().await }
    })
    .await;
    daemon.wait_for_channels_in_use(0).await;

    let mut third = daemon.master("m3", 2).await;
    assert!(matches!(next_event(&mut third).await, HandshakeEvent::MatchCreated(_)));
    let mut fourth = daemon.master("m4", 2).await;
    assert_eq!(
        next_event(&mut fourth).await,
        HandshakeEvent::Refused(Refusal::NoMoreMatch)
    );
}
