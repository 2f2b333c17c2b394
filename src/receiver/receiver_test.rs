use super::*;

use crate::packet::ChannelType;

fn mk_data(seq: u32, payload: &[u8], channel: ChannelType) -> Packet {
    Packet::Data {
        channel,
        seq,
        ts_send: 111,
        payload: Bytes::copy_from_slice(payload),
    }
}

fn ack_of(pkt: &Packet) -> u32 {
    match pkt {
        Packet::Ack { ack, .. } | Packet::Sack { ack, .. } => *ack,
        _ => panic!("expected feedback packet, got {pkt}"),
    }
}

#[test]
fn test_unreliable_channel_bypasses_reassembly() -> Result<()> {
    let mut r = Receiver::new(65535, true);

    let fb = r.on_data(&mk_data(0, b"ABC", CH_UNRELIABLE))?;
    assert!(fb.is_none());
    assert_eq!(r.pop_deliverable(), Bytes::from_static(b"ABC"));
    // Unreliable payloads never move the cumulative ack point.
    assert_eq!(r.rcv_nxt(), 0);
    Ok(())
}

#[test]
fn test_in_order_delivery_and_ack() -> Result<()> {
    let mut r = Receiver::new(65535, true);
    r.rcv_nxt = 1000;

    let fb = r.on_data(&mk_data(1000, b"abc", CH_RELIABLE))?;
    let fb = fb.expect("reliable DATA yields feedback");
    assert_eq!(ack_of(&fb), 1003);
    // In-order data leaves no gap, so plain ACK feedback.
    assert!(matches!(fb, Packet::Ack { .. }));
    assert_eq!(r.pop_deliverable(), Bytes::from_static(b"abc"));
    Ok(())
}

#[test]
fn test_out_of_order_then_fill_the_gap() -> Result<()> {
    let mut r = Receiver::new(65535, true);

    let fb = r.on_data(&mk_data(3, b"DEF", CH_RELIABLE))?.expect("feedback");
    assert_eq!(ack_of(&fb), 0);
    match &fb {
        Packet::Sack { blocks, .. } => {
            assert_eq!(blocks, &vec![SackBlock { start: 3, end: 6 }]);
        }
        other => panic!("expected SACK for buffered gap, got {other}"),
    }
    assert!(r.pop_deliverable().is_empty());

    let fb = r.on_data(&mk_data(0, b"ABC", CH_RELIABLE))?.expect("feedback");
    assert_eq!(ack_of(&fb), 6);
    assert!(matches!(fb, Packet::Ack { .. }));
    assert_eq!(r.pop_deliverable(), Bytes::from_static(b"ABCDEF"));
    Ok(())
}

#[test]
fn test_duplicate_below_rcvnxt_is_ignored() -> Result<()> {
    let mut r = Receiver::new(65535, true);
    r.on_data(&mk_data(0, b"AAA", CH_RELIABLE))?;
    r.on_data(&mk_data(3, b"BBB", CH_RELIABLE))?;
    assert_eq!(r.pop_deliverable(), Bytes::from_static(b"AAABBB"));

    let fb = r.on_data(&mk_data(0, b"AAA", CH_RELIABLE))?.expect("feedback");
    assert_eq!(ack_of(&fb), 6);
    assert!(r.pop_deliverable().is_empty());
    Ok(())
}

#[test]
fn test_left_overlap_is_trimmed() -> Result<()> {
    let mut r = Receiver::new(65535, true);
    r.on_data(&mk_data(0, b"AB", CH_RELIABLE))?;
    assert_eq!(r.pop_deliverable(), Bytes::from_static(b"AB"));

    // [0, 4) overlaps the delivered prefix [0, 2); only "CD" is new.
    let fb = r.on_data(&mk_data(0, b"ABCD", CH_RELIABLE))?.expect("feedback");
    assert_eq!(ack_of(&fb), 4);
    assert_eq!(r.pop_deliverable(), Bytes::from_static(b"CD"));
    Ok(())
}

#[test]
fn test_rejects_non_data_packets() {
    let mut r = Receiver::new(65535, true);
    let pkt = Packet::Ack {
        channel: CH_RELIABLE,
        seq: 0,
        ts_send: 0,
        ack: 0,
        rcv_wnd: 0,
        ts_echo: 0,
    };
    assert!(matches!(r.on_data(&pkt), Err(Error::ErrNotDataPacket)));
}

#[test]
fn test_feedback_echoes_timestamp_and_window() -> Result<()> {
    let mut r = Receiver::new(4096, true);
    let fb = r.on_data(&mk_data(0, b"xy", CH_RELIABLE))?.expect("feedback");
    match fb {
        Packet::Ack {
            channel,
            seq,
            ts_send,
            ack,
            rcv_wnd,
            ts_echo,
        } => {
            assert_eq!(channel, CH_RELIABLE);
            assert_eq!(seq, 2);
            assert_eq!(ts_send, 0);
            assert_eq!(ack, 2);
            assert_eq!(rcv_wnd, 4096);
            assert_eq!(ts_echo, 111);
        }
        other => panic!("expected ACK, got {other}"),
    }
    Ok(())
}

#[test]
fn test_sack_blocks_merge_and_sort_descending() -> Result<()> {
    let mut r = Receiver::new(65535, true);

    // Touching spans [10, 12) + [12, 14) merge; [20, 23) stays separate.
    r.on_data(&mk_data(10, b"xx", CH_RELIABLE))?;
    r.on_data(&mk_data(12, b"yy", CH_RELIABLE))?;
    let fb = r.on_data(&mk_data(20, b"zzz", CH_RELIABLE))?.expect("feedback");

    match fb {
        Packet::Sack { ack, blocks, .. } => {
            assert_eq!(ack, 0);
            assert_eq!(
                blocks,
                vec![
                    SackBlock { start: 20, end: 23 },
                    SackBlock { start: 10, end: 14 },
                ]
            );
        }
        other => panic!("expected SACK, got {other}"),
    }
    Ok(())
}

#[test]
fn test_sack_block_limit() -> Result<()> {
    let mut r = Receiver::new(65535, true);

    // Six disjoint gaps; only the four highest-start blocks are reported.
    for i in 0..6u32 {
        r.on_data(&mk_data(10 + i * 10, b"abc", CH_RELIABLE))?;
    }
    let fb = r.feedback(0);

    match fb {
        Packet::Sack { blocks, .. } => {
            assert_eq!(blocks.len(), 4);
            let starts: Vec<u32> = blocks.iter().map(|b| b.start).collect();
            assert_eq!(starts, vec![60, 50, 40, 30]);
            for b in &blocks {
                assert!(b.start < b.end);
                assert!(b.start >= r.rcv_nxt());
            }
        }
        other => panic!("expected SACK, got {other}"),
    }
    Ok(())
}

#[test]
fn test_sack_disabled_emits_plain_ack() -> Result<()> {
    let mut r = Receiver::new(65535, false);

    let fb = r.on_data(&mk_data(5, b"zz", CH_RELIABLE))?.expect("feedback");
    assert!(matches!(fb, Packet::Ack { .. }));
    assert_eq!(ack_of(&fb), 0);
    Ok(())
}

#[test]
fn test_rcv_nxt_is_monotone() -> Result<()> {
    let mut r = Receiver::new(65535, true);
    let mut high_water = r.rcv_nxt();

    let steps: Vec<(u32, &[u8])> = vec![
        (6, b"GHI"),
        (0, b"ABC"),
        (0, b"ABC"),
        (3, b"DEF"),
        (2, b"CDEF"),
    ];
    for (seq, payload) in steps {
        r.on_data(&mk_data(seq, payload, CH_RELIABLE))?;
        assert!(r.rcv_nxt() >= high_water);
        high_water = r.rcv_nxt();
    }

    assert_eq!(r.rcv_nxt(), 9);
    assert_eq!(r.pop_deliverable(), Bytes::from_static(b"ABCDEFGHI"));
    Ok(())
}
