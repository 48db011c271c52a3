#![no_main]

//! Checks the TLS key registry and per-thread value lists against a
//! simple map model under arbitrary op sequences.

use arbitrary::Arbitrary;
use coop_threads::{scheduler, tls, ThreadError};
use libfuzzer_sys::fuzz_target;
use std::collections::HashMap;
use std::sync::Once;

#[derive(Debug, Arbitrary)]
enum Op {
    Create { with_destructor: bool },
    Set { key_index: u8, value: u32 },
    Get { key_index: u8 },
    Delete { key_index: u8 },
    SetBogus { key_offset: u8 },
}

fn noop_destructor(_value: usize) {}

static INIT: Once = Once::new();

fuzz_target!(|ops: Vec<Op>| {
    INIT.call_once(|| {
        scheduler::init().expect("scheduler init");
    });

    let mut keys: Vec<usize> = Vec::new();
    let mut model: HashMap<usize, usize> = HashMap::new();

    for op in ops.iter().take(256) {
        match *op {
            Op::Create { with_destructor } => {
                let destructor = if with_destructor {
                    Some(noop_destructor as fn(usize))
                } else {
                    None
                };
                let key = tls::key_create(destructor).expect("key_create");
                assert!(!keys.contains(&key), "keys must never be reused");
                keys.push(key);
            }
            Op::Set { key_index, value } => {
                if keys.is_empty() {
                    continue;
                }
                let key = keys[key_index as usize % keys.len()];
                tls::set(key, value as usize).expect("set on a valid key");
                model.insert(key, value as usize);
            }
            Op::Get { key_index } => {
                if keys.is_empty() {
                    continue;
                }
                let key = keys[key_index as usize % keys.len()];
                assert_eq!(tls::get(key), model.get(&key).copied());
            }
            Op::Delete { key_index } => {
                if keys.is_empty() {
                    continue;
                }
                let key = keys[key_index as usize % keys.len()];
                // Deleting only drops the registry entry; stored values
                // survive and the key stays settable.
                let _ = tls::key_delete(key);
            }
            Op::SetBogus { key_offset } => {
                let bogus = usize::MAX - key_offset as usize;
                assert_eq!(
                    tls::set(bogus, 1),
                    Err(ThreadError::InvalidArgument)
                );
                assert_eq!(tls::get(bogus), None);
            }
        }
    }
});
