//! Group Membership Tests
//!
//! Drives one service instance with synthetic Trust/Suspect indications and
//! delivered protocol messages, checking the propose/ack/commit discipline.

#[cfg(test)]
mod tests {
    use crate::membership::types::{MembershipMessage, MembershipOutput, Role, View};
    use crate::membership::MembershipService;
    use crate::net::types::ProcessId;
    use std::collections::BTreeSet;

    fn pid(id: u64) -> ProcessId {
        ProcessId::new(id, format!("127.0.0.1:{}", 5000 + id).parse().unwrap())
    }

    fn nodes(ids: &[u64]) -> BTreeSet<ProcessId> {
        ids.iter().copied().map(pid).collect()
    }

    /// Service for self with replication degree 2 (quorum 2, capacity 3).
    fn service(self_id: u64, ids: &[u64]) -> MembershipService {
        let mut s = MembershipService::new(pid(self_id), 2);
        let out = s.init(nodes(ids));
        assert!(matches!(out[..], [MembershipOutput::ElectorInit(_)]));
        s
    }

    fn proposal_of(out: &[MembershipOutput]) -> Option<View> {
        out.iter().find_map(|o| match o {
            MembershipOutput::Broadcast {
                msg: MembershipMessage::ViewProposal(v),
                ..
            } => Some(v.clone()),
            _ => None,
        })
    }

    fn commit_of(out: &[MembershipOutput]) -> Option<View> {
        out.iter().find_map(|o| match o {
            MembershipOutput::Broadcast {
                msg: MembershipMessage::ViewCommit(v),
                ..
            } => Some(v.clone()),
            _ => None,
        })
    }

    #[test]
    fn test_first_trust_proposes_view_one() {
        let mut s = service(1, &[1, 2, 3]);
        s.on_trust(pid(1));
        assert_eq!(s.role(), Role::Leader);
        let out = s.tick();
        let proposal = proposal_of(&out).expect("leader should propose");
        assert_eq!(proposal.id, 1);
        assert_eq!(proposal.members, nodes(&[1, 2, 3]));
        assert_eq!(proposal.leader, Some(pid(1)));
    }

    #[test]
    fn test_quorum_ack_commits_and_delivers_on_own_commit() {
        let mut s = service(1, &[1, 2, 3]);
        s.on_trust(pid(1));
        s.tick();
        // self and one backup ack: quorum of 2 reached
        s.on_accept(1, pid(1));
        s.on_accept(1, pid(2));
        let out = s.tick();
        let committed = commit_of(&out).expect("quorum acked, commit expected");
        assert_eq!(committed.id, 1);
        assert_eq!(s.current_view().id, 1);

        // delivery happens when the leader's own commit comes back
        let out = s.on_commit(committed.clone());
        assert!(out
            .iter()
            .any(|o| matches!(o, MembershipOutput::ViewDelivered(v) if v.id == 1)));
        assert!(out
            .iter()
            .any(|o| matches!(o, MembershipOutput::ElectorInit(n) if *n == committed.members)));
    }

    #[test]
    fn test_commit_is_rebroadcast_until_install_confirmed() {
        let mut s = service(1, &[1, 2, 3]);
        s.on_trust(pid(1));
        s.tick();
        s.on_accept(1, pid(1));
        s.on_accept(1, pid(2));
        let out = s.tick();
        assert_eq!(commit_of(&out).unwrap().id, 1);
        // a lost commit datagram is recovered on the next tick
        let out = s.tick();
        assert_eq!(commit_of(&out).unwrap().id, 1);
        // the install confirmation stops the retry
        s.on_view_installed(1);
        let out = s.tick();
        assert!(commit_of(&out).is_none());
    }

    #[test]
    fn test_duplicate_commit_is_delivered_once() {
        let mut s = service(2, &[1, 2, 3]);
        s.on_trust(pid(1));
        let v = View {
            members: nodes(&[1, 2, 3]),
            id: 1,
            leader: Some(pid(1)),
        };
        let out = s.on_commit(v.clone());
        assert!(out
            .iter()
            .any(|o| matches!(o, MembershipOutput::ViewDelivered(dv) if dv.id == 1)));
        // fair-loss links may duplicate the datagram
        assert!(s.on_commit(v).is_empty());
    }

    #[test]
    fn test_kill_one_of_three_converges_on_two_member_view() {
        // Scenario: A(1), B(2), C(3); C crashes; quorum 2.
        let mut a = service(1, &[1, 2, 3]);
        a.on_trust(pid(1));
        a.on_accept(1, pid(1));
        a.on_accept(1, pid(2));
        a.on_accept(1, pid(3));
        let out = a.tick();
        a.on_commit(commit_of(&out).unwrap());

        a.on_suspect(pid(3));
        let out = a.tick();
        let proposal = proposal_of(&out).expect("crash should trigger a proposal");
        assert_eq!(proposal.members, nodes(&[1, 2]));
        assert!(proposal.id > 1);

        a.on_accept(proposal.id, pid(1));
        a.on_accept(proposal.id, pid(2));
        let out = a.tick();
        let committed = commit_of(&out).unwrap();
        assert_eq!(committed.members.len(), 2);
        assert_eq!(committed.leader, Some(pid(1)));
    }

    #[test]
    fn test_under_quorum_leader_terminates() {
        let mut s = service(1, &[1, 2, 3]);
        s.on_trust(pid(1));
        s.on_suspect(pid(2));
        s.on_suspect(pid(3));
        let out = s.tick();
        assert!(matches!(out[..], [MembershipOutput::Shutdown(_)]));
    }

    #[test]
    fn test_worker_never_commits_below_quorum() {
        // quorum floor: no commit can carry fewer than `q` members because a
        // leader under quorum shuts down before proposing
        let mut s = service(1, &[1, 2]);
        s.on_trust(pid(1));
        s.on_suspect(pid(2));
        let out = s.tick();
        assert!(commit_of(&out).is_none());
        assert!(matches!(out[..], [MembershipOutput::Shutdown(_)]));
    }

    #[test]
    fn test_proposal_from_untrusted_leader_is_ignored() {
        let mut s = service(2, &[1, 2, 3]);
        s.on_trust(pid(1));
        let stale = View {
            members: nodes(&[2, 3]),
            id: 5,
            leader: Some(pid(3)),
        };
        assert!(s.on_proposal(stale).is_empty());
    }

    #[test]
    fn test_proposal_from_trusted_leader_is_acked_to_proposer() {
        let mut s = service(2, &[1, 2, 3]);
        s.on_trust(pid(1));
        let view = View {
            members: nodes(&[1, 2, 3]),
            id: 1,
            leader: Some(pid(1)),
        };
        let out = s.on_proposal(view);
        match &out[..] {
            [MembershipOutput::Send { to, msg }] => {
                assert_eq!(*to, pid(1));
                assert!(
                    matches!(msg, MembershipMessage::ViewAccept { view_id: 1, from } if *from == pid(2))
                );
            }
            other => panic!("expected one ack, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_ack_is_idempotent() {
        let mut s = service(1, &[1, 2, 3]);
        s.on_trust(pid(1));
        s.tick();
        s.on_accept(1, pid(2));
        s.on_accept(1, pid(2));
        // still below quorum (only one acker), so the tick re-proposes
        let out = s.tick();
        assert!(proposal_of(&out).is_some());
        assert!(commit_of(&out).is_none());
    }

    #[test]
    fn test_stale_ack_for_old_proposal_is_dropped() {
        let mut s = service(1, &[1, 2, 3]);
        s.on_trust(pid(1));
        s.tick();
        // membership changes before the proposal commits: new proposal id
        s.on_suspect(pid(3));
        let out = s.tick();
        let second = proposal_of(&out).expect("superseding proposal");
        assert_eq!(second.id, 2);
        // acks for the dead proposal must not count toward the new one
        s.on_accept(1, pid(2));
        let out = s.tick();
        assert!(commit_of(&out).is_none());
        s.on_accept(2, pid(1));
        s.on_accept(2, pid(2));
        let out = s.tick();
        assert_eq!(commit_of(&out).unwrap().id, 2);
    }

    #[test]
    fn test_join_admission_capped_at_group_capacity() {
        let mut s = service(1, &[1, 2, 3]);
        // capacity is 3: a fourth member is rejected
        let out = s.on_join(pid(4));
        assert!(out.is_empty());
        // after a crash there is room again
        s.on_suspect(pid(3));
        let out = s.on_join(pid(4));
        assert!(
            matches!(&out[..], [MembershipOutput::Reconfigure(add)] if add.contains(&pid(4)))
        );
        assert!(s.members().contains(&pid(4)));
    }

    #[test]
    fn test_join_survives_concurrent_commit() {
        let mut s = service(1, &[1, 2]);
        s.on_trust(pid(1));
        s.tick();
        // joiner admitted while view 1 {1,2} is still pending
        s.on_join(pid(3));
        let committed = View {
            members: nodes(&[1, 2]),
            id: 1,
            leader: Some(pid(1)),
        };
        s.on_commit(committed);
        // the joiner is still in the working set, so the next proposal
        // includes it
        assert!(s.members().contains(&pid(3)));
        let out = s.tick();
        let proposal = proposal_of(&out).expect("joiner should force a new proposal");
        assert!(proposal.members.contains(&pid(3)));
    }

    #[test]
    fn test_stale_commit_does_not_regress_view() {
        let mut s = service(2, &[1, 2, 3]);
        s.on_trust(pid(1));
        let v2 = View {
            members: nodes(&[1, 2]),
            id: 2,
            leader: Some(pid(1)),
        };
        s.on_commit(v2);
        assert_eq!(s.current_view().id, 2);
        let v1 = View {
            members: nodes(&[1, 2, 3]),
            id: 1,
            leader: Some(pid(1)),
        };
        assert!(s.on_commit(v1).is_empty());
        assert_eq!(s.current_view().id, 2);
    }
}
