use crate::*;

use hangman_core::GameMessage;
use hangman_player::GameChannel;

/// A hit reveals letters for free, a miss costs one trial, and every
/// guesser sees every result.
#[tokio::test]
async fn scenario_a_hits_and_misses() {
    let daemon = Daemon::start(test_config(2)).await;
    let (host, guessers) = form_match(&daemon, "bob", &["amy", "cid"]).await;
    let hub = LocalHub::new();

    let mut master = MasterPlayer::spawn(host, &hub, "cat", &daemon.config);
    let mut players = guessers
        .into_iter()
        .map(|g| GuesserPlayer::spawn(g, &hub, &daemon.config));
    let mut amy = players.next().unwrap();
    let mut cid = players.next().unwrap();

    amy.guess('c').await;
    assert_eq!(master.next_accepted().await, ("amy".into(), 'c', "c__".into(), 10));
    amy.acknowledged(1).await;

    amy.guess('z').await;
    assert_eq!(master.next_accepted().await, ("amy".into(), 'z', "c__".into(), 9));
    amy.acknowledged(2).await;

    let seen = cid
        .until(|e| match e {
            GuesserEvent::Progress {
                letter: 'z',
                pattern,
                missed,
                ..
            } => Some((pattern, missed)),
            _ => None,
        })
        .await;
    assert_eq!(seen, ("c__".to_string(), "z".to_string()));

    master.commands.send(MasterCommand::Abort).await.unwrap();
    assert_eq!(master.outcome().await, MasterOutcome::Abandoned);
    assert_eq!(amy.outcome().await, GuesserOutcome::EndGame);
    assert_eq!(cid.outcome().await, GuesserOutcome::EndGame);
}

/// A guess lost on the way to the master is retransmitted unchanged and
/// applied exactly once.
#[tokio::test]
async fn scenario_b_lost_guess_is_retransmitted() {
    let daemon = Daemon::start(test_config(2)).await;
    let (host, guessers) = form_match(&daemon, "bob", &["amy", "cid"]).await;
    let hub = LocalHub::new();

    let mut master = MasterPlayer::spawn(host, &hub, "cat", &daemon.config);
    let mut players = guessers
        .into_iter()
        .map(|g| GuesserPlayer::spawn(g, &hub, &daemon.config));
    let mut amy = players.next().unwrap();
    let _cid = players.next().unwrap();

    for (pkt, letter) in [(1, 'c'), (2, 'z')] {
        amy.guess(letter).await;
        master.next_accepted().await;
        amy.acknowledged(pkt).await;
    }

    hub.drop_next_from(amy.addr, 1);
    amy.guess('a').await;
    amy.until(|e| match e {
        GuesserEvent::Retransmit { pkt_number: 3 } => Some(()),
        _ => None,
    })
    .await;
    amy.acknowledged(3).await;

    assert_eq!(master.next_accepted().await, ("amy".into(), 'a', "ca_".into(), 9));
    tokio::time::sleep(daemon.config.game.ack_timeout() * 3).await;
    while let Ok(event) = master.events.try_recv() {
        assert!(
            !matches!(event, MasterEvent::Accepted { .. }),
            "retransmission applied twice: {event:?}"
        );
    }

    master.commands.send(MasterCommand::Abort).await.unwrap();
    assert_eq!(master.outcome().await, MasterOutcome::Abandoned);
}

/// Two guessers send the winning letter at once. It is applied once and
/// whoever was processed first wins.
#[tokio::test]
async fn scenario_c_simultaneous_winning_guesses() {
    let daemon = Daemon::start(test_config(2)).await;
    let (host, guessers) = form_match(&daemon, "bob", &["amy", "cid", "dee"]).await;
    let hub = LocalHub::new();

    let mut master = MasterPlayer::spawn(host, &hub, "cat", &daemon.config);
    let mut players = guessers
        .into_iter()
        .map(|g| GuesserPlayer::spawn(g, &hub, &daemon.config));
    let amy = players.next().unwrap();
    let cid = players.next().unwrap();
    let mut dee = players.next().unwrap();

    for (pkt, letter) in [(1, 'c'), (2, 'a')] {
        dee.guess(letter).await;
        master.next_accepted().await;
        dee.acknowledged(pkt).await;
    }

    tokio::join!(amy.guess('t'), cid.guess('t'));

    let (winner, letter, pattern, trials) = master.next_accepted().await;
    assert!(winner == "amy" || winner == "cid", "unexpected winner {winner}");
    assert_eq!((letter, pattern.as_str(), trials), ('t', "cat", 10));

    let expected = GuesserOutcome::GuesserWin {
        guesser: winner.clone(),
        word: "cat".into(),
    };
    assert_eq!(amy.outcome().await, expected);
    assert_eq!(cid.outcome().await, expected);
    assert_eq!(dee.outcome().await, expected);
    assert_eq!(
        master.outcome().await,
        MasterOutcome::GuesserWin {
            guesser: winner,
            word: "cat".into()
        }
    );
}

/// The game timer ends an unsolved game for everyone, and the coordinator
/// gets the channel back afterwards.
#[tokio::test]
async fn scenario_d_game_timer_ends_the_match() {
    let mut config = test_config(1);
    config.game.match_secs = 1;
    let daemon = Daemon::start(config).await;
    let (host, guessers) = form_match(&daemon, "bob", &["amy"]).await;
    let hub = LocalHub::new();
    assert_eq!(daemon.channels_in_use(), 1);

    let master = MasterPlayer::spawn(host, &hub, "cat", &daemon.config);
    let mut amy = guessers
        .into_iter()
        .map(|g| GuesserPlayer::spawn(g, &hub, &daemon.config))
        .next()
        .unwrap();

    amy.guess('z').await;
    amy.acknowledged(1).await;

    assert_eq!(amy.outcome().await, GuesserOutcome::Timeout);
    assert_eq!(master.outcome().await, MasterOutcome::Timeout);

    daemon.wait_for_channels_in_use(0).await;

    let mut next = daemon.master("eve", 1).await;
    assert!(matches!(next_event(&mut next).await, HandshakeEvent::MatchCreated(_)));
}

/// A guesser that keeps resending an accepted number gets its result once,
/// then GO_ON after the stale threshold, and the letter is applied once.
#[tokio::test]
async fn resent_guess_is_suppressed_then_unblocked() {
    let daemon = Daemon::start(test_config(1)).await;
    let (host, guessers) = form_match(&daemon, "bob", &["amy"]).await;
    let hub = LocalHub::new();

    let mut master = MasterPlayer::spawn(host, &hub, "cat", &daemon.config);
    let (_, raw): (String, GameChannel<_>) = guessers
        .into_iter()
        .next()
        .unwrap()
        .attach(hub.join());

    let guess = raw
        .seal(&GameMessage::NewLetter {
            letter: 'z',
            guesser: "amy".into(),
            pkt_number: 1,
        })
        .unwrap();
    let threshold = daemon.config.game.stale_threshold as usize;
    for _ in 0..threshold + 2 {
        raw.broadcast_sealed(&guess).await.unwrap();
    }

    let (result, _) = raw.recv().await.unwrap();
    assert_eq!(
        result,
        GameMessage::PartialResult {
            letter: 'z',
            guesser: "amy".into(),
            word: "___".into(),
            pkt_number: 1,
        }
    );
    let (go_on, from) = raw.recv().await.unwrap();
    assert_eq!(
        go_on,
        GameMessage::GoOn {
            guesser: "amy".into(),
            pkt_number: 1
        }
    );
    assert_eq!(from, master.addr);

    assert_eq!(master.next_accepted().await, ("amy".into(), 'z', "___".into(), 9));
    master.commands.send(MasterCommand::Abort).await.unwrap();
    assert_eq!(master.outcome().await, MasterOutcome::Abandoned);
}

/// A lost PARTIAL_RESULT leaves the guesser resending an already applied
/// guess. The master answers with one GO_ON once the stale threshold is
/// reached, which unblocks the guesser within ack timeout × (threshold + 1).
#[tokio::test]
async fn lost_result_is_recovered_by_go_on() {
    let mut config = test_config(1);
    config.game.ack_millis = 100;
    let daemon = Daemon::start(config).await;
    let (host, guessers) = form_match(&daemon, "bob", &["amy"]).await;
    let hub = LocalHub::new();

    let mut master = MasterPlayer::spawn(host, &hub, "cat", &daemon.config);
    let mut amy = guessers
        .into_iter()
        .map(|g| GuesserPlayer::spawn(g, &hub, &daemon.config))
        .next()
        .unwrap();

    let ack = daemon.config.game.ack_timeout();
    let threshold = daemon.config.game.stale_threshold;

    hub.drop_next_from(master.addr, 1);
    let sent = tokio::time::Instant::now();
    amy.guess('z').await;

    let resent = amy
        .until({
            let mut resent = 0u32;
            move |e| match e {
                GuesserEvent::Retransmit { pkt_number: 1 } => {
                    resent += 1;
                    None
                }
                GuesserEvent::Acknowledged { pkt_number: 1 } => Some(resent),
                _ => None,
            }
        })
        .await;
    let elapsed = sent.elapsed();

    assert_eq!(resent, threshold + 1);
    assert!(
        elapsed < ack * (threshold + 1) + ack / 2,
        "unblocked after {elapsed:?}"
    );
    assert_eq!(master.next_accepted().await, ("amy".into(), 'z', "___".into(), 9));

    tokio::time::sleep(ack * 3).await;
    let mut go_ons = 0;
    while let Ok(event) = master.events.try_recv() {
        match event {
            MasterEvent::GoOn { guesser, pkt_number } => {
                assert_eq!((guesser.as_str(), pkt_number), ("amy", 1));
                go_ons += 1;
            }
            other => panic!("unexpected master event {other:?}"),
        }
    }
    assert_eq!(go_ons, 1);

    master.commands.send(MasterCommand::Abort).await.unwrap();
    assert_eq!(master.outcome().await, MasterOutcome::Abandoned);
    assert_eq!(amy.outcome().await, GuesserOutcome::EndGame);
}
