//! Failure Detector Tests
//!
//! Drives the detector state machine round by round with synthetic heartbeat
//! replies; no network is involved.

#[cfg(test)]
mod tests {
    use crate::detector::types::{DetectorMessage, DetectorOutput};
    use crate::detector::FailureDetector;
    use crate::net::types::ProcessId;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn pid(id: u64) -> ProcessId {
        ProcessId::new(id, format!("127.0.0.1:{}", 5000 + id).parse().unwrap())
    }

    fn peers(ids: &[u64]) -> BTreeSet<ProcessId> {
        ids.iter().copied().map(pid).collect()
    }

    fn detector(ids: &[u64]) -> FailureDetector {
        let mut d = FailureDetector::new(pid(1), Duration::from_millis(100));
        d.init(peers(ids));
        d
    }

    fn suspects(out: &[DetectorOutput]) -> Vec<ProcessId> {
        out.iter()
            .filter_map(|o| match o {
                DetectorOutput::Suspect(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    fn restores(out: &[DetectorOutput]) -> Vec<ProcessId> {
        out.iter()
            .filter_map(|o| match o {
                DetectorOutput::Restore(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    fn reply(d: &mut FailureDetector, from: ProcessId, seq: u64) {
        let out = d.on_message(DetectorMessage::HeartbeatReply { seq, from });
        assert!(out.is_empty());
    }

    #[test]
    fn test_first_round_suspects_nobody() {
        let mut d = detector(&[1, 2, 3]);
        let out = d.tick();
        assert!(suspects(&out).is_empty(), "peers start out alive");
        // one heartbeat request per monitored peer
        let sends = out
            .iter()
            .filter(|o| matches!(o, DetectorOutput::Send { .. }))
            .count();
        assert_eq!(sends, 3);
    }

    #[test]
    fn test_silent_peer_is_suspected_and_stays_suspected() {
        let mut d = detector(&[1, 2, 3]);
        d.tick();
        // only 1 and 2 reply to round 1
        reply(&mut d, pid(1), 1);
        reply(&mut d, pid(2), 1);
        let out = d.tick();
        assert_eq!(suspects(&out), vec![pid(3)]);

        // peer 3 stays silent; no further Suspect indications are emitted
        reply(&mut d, pid(1), 2);
        reply(&mut d, pid(2), 2);
        let out = d.tick();
        assert!(suspects(&out).is_empty());
        assert!(d.suspected().contains(&pid(3)));
    }

    #[test]
    fn test_late_reply_restores_and_grows_delay() {
        let mut d = detector(&[1, 2]);
        let initial_delay = d.delay();
        d.tick();
        reply(&mut d, pid(1), 1);
        let out = d.tick();
        assert_eq!(suspects(&out), vec![pid(2)]);

        // a reply from a suspected peer is accepted regardless of its seq
        reply(&mut d, pid(1), 2);
        reply(&mut d, pid(2), 1);
        let out = d.tick();
        assert_eq!(restores(&out), vec![pid(2)]);
        assert!(d.suspected().is_empty());
        assert_eq!(d.delay(), initial_delay + Duration::from_millis(100));
    }

    #[test]
    fn test_stale_reply_from_unsuspected_peer_is_dropped() {
        let mut d = detector(&[1, 2]);
        d.tick();
        reply(&mut d, pid(1), 1);
        reply(&mut d, pid(2), 1);
        d.tick();
        // reply for round 1 arrives during round 2, sender not suspected
        reply(&mut d, pid(2), 1);
        reply(&mut d, pid(1), 2);
        let out = d.tick();
        assert_eq!(suspects(&out), vec![pid(2)]);
    }

    #[test]
    fn test_heartbeat_request_is_answered_with_same_seq() {
        let mut d = detector(&[1, 2]);
        let out = d.on_message(DetectorMessage::HeartbeatRequest {
            seq: 7,
            from: pid(2),
        });
        match &out[..] {
            [DetectorOutput::Send { to, msg }] => {
                assert_eq!(*to, pid(2));
                match msg {
                    DetectorMessage::HeartbeatReply { seq, from } => {
                        assert_eq!(*seq, 7);
                        assert_eq!(*from, pid(1));
                    }
                    other => panic!("unexpected reply: {:?}", other),
                }
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[test]
    fn test_reconfigure_adds_peer_without_reset() {
        let mut d = detector(&[1, 2]);
        d.tick();
        reply(&mut d, pid(1), 1);
        let out = d.tick();
        assert_eq!(suspects(&out), vec![pid(2)]);

        d.reconfigure(peers(&[4]));
        assert!(d.monitored().contains(&pid(4)));
        // existing suspicion survives reconfiguration
        assert!(d.suspected().contains(&pid(2)));

        // the new peer gets one round of grace...
        reply(&mut d, pid(1), 2);
        let out = d.tick();
        assert!(suspects(&out).is_empty());
        // ...and is suspected after missing a full round
        reply(&mut d, pid(1), 3);
        let out = d.tick();
        assert_eq!(suspects(&out), vec![pid(4)]);
    }

    #[test]
    fn test_init_resets_everything() {
        let mut d = detector(&[1, 2]);
        d.tick();
        let out = d.tick();
        assert!(!suspects(&out).is_empty());
        d.init(peers(&[1, 2, 3]));
        assert!(d.suspected().is_empty());
        let out = d.tick();
        assert!(suspects(&out).is_empty());
    }
}
