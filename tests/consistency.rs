//! Randomized checks of the search results against a naive model that
//! keeps every stored prefix in a vector and scans it linearly.

use std::error::Error;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lpm_table::{LpmError, LpmPrefix, LpmTable, LEVEL_MAX};

/// Does `prefix` cover `addr`?
fn covers(prefix: &LpmPrefix, addr: &[u8; LEVEL_MAX]) -> bool {
    let p = prefix.addr();
    let len = prefix.len() as usize;
    let full = len / 8;
    if p[..full] != addr[..full] {
        return false;
    }
    let bits = len % 8;
    if bits == 0 {
        return true;
    }
    let mask = 0xFFu8 << (8 - bits);
    p[full] & mask == addr[full] & mask
}

/// The payload of the longest stored prefix of length one or more that
/// covers `addr`. A stored zero-length prefix never answers searches,
/// matching the table's zero-route contract.
fn model_search<'a>(
    model: &'a [(LpmPrefix, u32)],
    addr: &[u8; LEVEL_MAX],
) -> Option<&'a u32> {
    model
        .iter()
        .filter(|(p, _)| !p.is_empty() && covers(p, addr))
        .max_by_key(|(p, _)| p.len())
        .map(|(_, v)| v)
}

fn random_prefix(rng: &mut StdRng) -> LpmPrefix {
    // a small universe, so that inserts, deletes and lookups keep
    // colliding with each other
    let mut addr = [0u8; LEVEL_MAX];
    addr[0] = rng.gen_range(0..4);
    addr[1] = rng.gen_range(0..8);
    addr[2] = rng.gen_range(0..4);
    let len = rng.gen_range(0..=24);
    LpmPrefix::new(addr, len).unwrap().truncate_to_len()
}

fn random_addr(rng: &mut StdRng) -> [u8; LEVEL_MAX] {
    let mut addr = [0u8; LEVEL_MAX];
    addr[0] = rng.gen_range(0..4);
    addr[1] = rng.gen_range(0..8);
    addr[2] = rng.gen_range(0..4);
    addr[3] = rng.gen_range(0..=255);
    addr
}

#[test]
fn search_agrees_with_the_linear_model() -> Result<(), Box<dyn Error>> {
    let mut rng = StdRng::seed_from_u64(0x1f_2e_3d_4c);
    let mut table = LpmTable::<u32>::new("model");
    let mut model: Vec<(LpmPrefix, u32)> = Vec::new();
    let mut next_payload = 0u32;

    for round in 0..400 {
        let prefix = random_prefix(&mut rng);
        let stored = model.iter().position(|(p, _)| *p == prefix);

        if rng.gen_bool(0.6) {
            next_payload += 1;
            match table.insert(&prefix, next_payload) {
                Ok(()) => {
                    assert!(stored.is_none(), "round {}", round);
                    model.push((prefix, next_payload));
                }
                Err(LpmError::Conflict) => {
                    assert!(stored.is_some(), "round {}", round);
                }
                Err(err) => panic!("round {}: unexpected {}", round, err),
            }
        } else {
            match table.remove(&prefix) {
                Ok(()) => {
                    let at = stored.unwrap();
                    model.swap_remove(at);
                }
                Err(LpmError::PrefixNotFound) => {
                    assert!(stored.is_none(), "round {}", round);
                }
                Err(err) => panic!("round {}: unexpected {}", round, err),
            }
        }

        for _ in 0..16 {
            let addr = random_addr(&mut rng);
            assert_eq!(
                table.search(&addr).payload,
                model_search(&model, &addr),
                "round {}: search diverged",
                round
            );
        }
    }

    // the authoritative trie agrees entry for entry
    assert_eq!(table.stats().payload_count() as usize, model.len());
    for (prefix, payload) in &model {
        assert_eq!(table.find_exact(prefix), Some(payload));
    }

    // emptying the table hands back every node and block
    for (prefix, _) in model {
        table.remove(&prefix)?;
    }
    assert_eq!(table.stats().payload_count(), 0);
    assert_eq!(table.stats().node_count(), 1);
    assert_eq!(table.stats().block_count(), 1);
    Ok(())
}

#[test]
fn interleaved_updates_stay_consistent() -> Result<(), Box<dyn Error>> {
    let mut rng = StdRng::seed_from_u64(0xdead_cafe);
    let mut table = LpmTable::<u32>::new("model");
    let mut model: Vec<(LpmPrefix, u32)> = Vec::new();

    for i in 0..40 {
        let prefix = random_prefix(&mut rng);
        if table.insert(&prefix, i).is_ok() {
            model.push((prefix, i));
        }
    }

    for round in 0..200 {
        let at = rng.gen_range(0..model.len());
        let (prefix, _) = model[at];
        let fresh = 1000 + round;
        table.update(&prefix, fresh)?;
        model[at].1 = fresh;

        let addr = random_addr(&mut rng);
        assert_eq!(
            table.search(&addr).payload,
            model_search(&model, &addr),
            "round {}",
            round
        );
    }

    for (prefix, payload) in &model {
        assert_eq!(table.find_exact(prefix), Some(payload));
    }
    Ok(())
}
