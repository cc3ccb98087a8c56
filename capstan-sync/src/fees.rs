//! Transaction fee computation.

use capstan_chain::ChainClient;
use capstan_core::{Error, Result, TxData};

/// Compute a transaction's fee: the sum of its inputs' previous output
/// values minus the sum of its own output values, in satoshis.
///
/// Costs one `raw_transaction` lookup per input; any failing lookup
/// fails the whole computation.
pub async fn transaction_fee(client: &dyn ChainClient, tx: &TxData) -> Result<u64> {
    if tx.is_coinbase {
        return Err(Error::UpstreamMalformed(format!(
            "fee is undefined for coinbase transaction {}",
            tx.txid
        )));
    }

    let mut input_total: u64 = 0;
    for input in &tx.inputs {
        let previous = client.raw_transaction(&input.prev_txid).await?;
        let spent = previous
            .outputs
            .get(input.prev_vout as usize)
            .ok_or_else(|| {
                Error::UpstreamMalformed(format!(
                    "{} spends {}:{} but that transaction has {} outputs",
                    tx.txid,
                    input.prev_txid,
                    input.prev_vout,
                    previous.outputs.len()
                ))
            })?;
        input_total = input_total
            .checked_add(spent.value_satoshis)
            .ok_or_else(|| {
                Error::UpstreamMalformed(format!("input value overflow in {}", tx.txid))
            })?;
    }

    input_total
        .checked_sub(tx.total_output_value())
        .ok_or_else(|| {
            Error::UpstreamMalformed(format!(
                "transaction {} outputs exceed its inputs",
                tx.txid
            ))
        })
}
