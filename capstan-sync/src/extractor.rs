//! Anchor extraction.
//!
//! A pure pass over one block: find transactions carrying exactly one
//! `OP_RETURN <prefix || payload>` output, and decide which of the
//! remaining transactions are eligible for fee sampling.

use tracing::{debug, warn};

use capstan_core::BlockData;

const OP_RETURN: u8 = 0x6a;
const OP_PUSHDATA1: u8 = 0x4c;

/// One anchor candidate found in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedAnchor {
    /// 0-based position of the carrying transaction within the block.
    pub tx_index: u32,
    /// Id of the carrying transaction.
    pub txid: String,
    /// OP_RETURN data with the prefix stripped.
    pub payload: Vec<u8>,
}

/// Result of scanning one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Anchor candidates, in block order.
    pub anchors: Vec<ExtractedAnchor>,
    /// Txids of non-anchor transactions eligible for fee sampling.
    pub sampling_candidates: Vec<String>,
}

/// Extract the pushed data from an `OP_RETURN` script, if the script
/// has that shape.
///
/// Handles the two push encodings that fit the 80-byte standardness
/// limit: a direct push (1-75 bytes) and `OP_PUSHDATA1`.
fn op_return_data(script: &[u8]) -> Option<&[u8]> {
    if script.first() != Some(&OP_RETURN) {
        return None;
    }
    match *script.get(1)? {
        len @ 1..=75 => script.get(2..2 + len as usize),
        OP_PUSHDATA1 => {
            let len = *script.get(2)? as usize;
            script.get(3..3 + len)
        }
        _ => None,
    }
}

/// Scan a block for anchors and sampling candidates.
///
/// Per transaction:
/// - exactly one prefixed OP_RETURN output makes it an anchor;
/// - two or more disqualify the whole transaction (it is neither
///   anchored nor sampled);
/// - none, and an input count within `max_input_count`, makes it a
///   sampling candidate.
///
/// Coinbase transactions are ignored entirely: they pay no fee, so
/// neither role applies. The function is pure over its inputs.
pub fn extract_anchors(block: &BlockData, prefix: &[u8], max_input_count: usize) -> Extraction {
    let mut extraction = Extraction::default();

    for (index, tx) in block.transactions.iter().enumerate() {
        if tx.is_coinbase {
            continue;
        }

        let mut payloads = tx
            .outputs
            .iter()
            .filter_map(|output| op_return_data(&output.script_pubkey))
            .filter(|data| data.starts_with(prefix));

        match (payloads.next(), payloads.next()) {
            (None, _) => {
                if tx.inputs.len() <= max_input_count {
                    extraction.sampling_candidates.push(tx.txid.clone());
                } else {
                    debug!(
                        txid = %tx.txid,
                        inputs = tx.inputs.len(),
                        "transaction has too many inputs, excluded from sampling"
                    );
                }
            }
            (Some(data), None) => {
                extraction.anchors.push(ExtractedAnchor {
                    tx_index: index as u32,
                    txid: tx.txid.clone(),
                    payload: data[prefix.len()..].to_vec(),
                });
            }
            (Some(_), Some(_)) => {
                warn!(
                    txid = %tx.txid,
                    block = block.height,
                    "transaction carries multiple anchor outputs, skipped"
                );
            }
        }
    }

    extraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::{TxData, TxInput, TxOutput};

    const PREFIX: &[u8] = b"sidetree:";

    fn op_return_script(data: &[u8]) -> Vec<u8> {
        let mut script = vec![OP_RETURN, data.len() as u8];
        script.extend_from_slice(data);
        script
    }

    fn output(script: Vec<u8>) -> TxOutput {
        TxOutput {
            value_satoshis: 0,
            script_pubkey: script,
        }
    }

    fn payment_output(value: u64) -> TxOutput {
        TxOutput {
            value_satoshis: value,
            // P2WPKH-shaped placeholder, not an OP_RETURN.
            script_pubkey: vec![0x00, 0x14, 0xaa],
        }
    }

    fn tx(txid: &str, inputs: usize, outputs: Vec<TxOutput>) -> TxData {
        TxData {
            txid: txid.into(),
            is_coinbase: false,
            inputs: (0..inputs)
                .map(|i| TxInput {
                    prev_txid: format!("prev_{}", i),
                    prev_vout: 0,
                })
                .collect(),
            outputs,
        }
    }

    fn block(transactions: Vec<TxData>) -> BlockData {
        BlockData {
            height: 101,
            hash: "hash_101".into(),
            transactions,
        }
    }

    #[test]
    fn test_single_anchor_extracted() {
        let anchor = tx(
            "a1",
            1,
            vec![
                payment_output(900),
                output(op_return_script(b"sidetree:abc")),
            ],
        );
        let extraction = extract_anchors(&block(vec![anchor]), PREFIX, 50);

        assert_eq!(extraction.anchors.len(), 1);
        assert_eq!(extraction.anchors[0].tx_index, 0);
        assert_eq!(extraction.anchors[0].payload, b"abc");
        assert!(extraction.sampling_candidates.is_empty());
    }

    #[test]
    fn test_double_anchor_rejected_entirely() {
        let double = tx(
            "d1",
            1,
            vec![
                output(op_return_script(b"sidetree:one")),
                output(op_return_script(b"sidetree:two")),
            ],
        );
        let normal = tx("n1", 1, vec![payment_output(500)]);
        let extraction = extract_anchors(&block(vec![double, normal]), PREFIX, 50);

        // The offender is neither an anchor nor a sample; its neighbor
        // is unaffected.
        assert!(extraction.anchors.is_empty());
        assert_eq!(extraction.sampling_candidates, vec!["n1".to_string()]);
    }

    #[test]
    fn test_wrong_prefix_is_sampling_candidate() {
        let other = tx("o1", 1, vec![output(op_return_script(b"omni:xyz"))]);
        let extraction = extract_anchors(&block(vec![other]), PREFIX, 50);

        assert!(extraction.anchors.is_empty());
        assert_eq!(extraction.sampling_candidates, vec!["o1".to_string()]);
    }

    #[test]
    fn test_too_many_inputs_excluded_from_sampling() {
        let fat = tx("f1", 51, vec![payment_output(10)]);
        let extraction = extract_anchors(&block(vec![fat]), PREFIX, 50);

        assert!(extraction.anchors.is_empty());
        assert!(extraction.sampling_candidates.is_empty());
    }

    #[test]
    fn test_coinbase_ignored() {
        let mut coinbase = tx("c1", 1, vec![payment_output(50_000)]);
        coinbase.is_coinbase = true;
        let extraction = extract_anchors(&block(vec![coinbase]), PREFIX, 50);

        assert!(extraction.anchors.is_empty());
        assert!(extraction.sampling_candidates.is_empty());
    }

    #[test]
    fn test_tx_index_counts_all_positions() {
        let mut coinbase = tx("c1", 1, vec![payment_output(50_000)]);
        coinbase.is_coinbase = true;
        let filler = tx("n1", 1, vec![payment_output(500)]);
        let anchor = tx("a1", 1, vec![output(op_return_script(b"sidetree:abc"))]);

        let extraction = extract_anchors(&block(vec![coinbase, filler, anchor]), PREFIX, 50);
        assert_eq!(extraction.anchors[0].tx_index, 2);
    }

    #[test]
    fn test_pushdata1_payload() {
        let payload: Vec<u8> = b"sidetree:"
            .iter()
            .copied()
            .chain(std::iter::repeat(0x41).take(68))
            .collect();
        let mut script = vec![OP_RETURN, OP_PUSHDATA1, payload.len() as u8];
        script.extend_from_slice(&payload);

        let anchor = tx("p1", 1, vec![output(script)]);
        let extraction = extract_anchors(&block(vec![anchor]), PREFIX, 50);

        assert_eq!(extraction.anchors.len(), 1);
        assert_eq!(extraction.anchors[0].payload.len(), 68);
    }

    #[test]
    fn test_op_return_roundtrip() {
        let data = b"sidetree:payload-bytes";
        let script = op_return_script(data);
        assert_eq!(op_return_data(&script), Some(&data[..]));
    }

    #[test]
    fn test_truncated_script_ignored() {
        // Declared push length runs past the script end.
        let script = vec![OP_RETURN, 10, 0x01, 0x02];
        assert_eq!(op_return_data(&script), None);
    }

    #[test]
    fn test_deterministic() {
        let b = block(vec![
            tx("a1", 1, vec![output(op_return_script(b"sidetree:x"))]),
            tx("n1", 2, vec![payment_output(77)]),
        ]);
        assert_eq!(
            extract_anchors(&b, PREFIX, 50),
            extract_anchors(&b, PREFIX, 50)
        );
    }
}
