use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::block::{Header as BlockHeader, Version};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{rand::thread_rng, SecretKey};
use bitcoin::hash_types::TxMerkleNode;
use bitcoin::{BlockHash, CompactTarget};
use event_bus::EventBus;
use mockall::predicate::eq;

use lightning_client::{AddedInvoice, MockLightningClient, NodeInfo, PaymentResult};
use sqk_p2p::client::handle::MockHandle;
use sqk_storage::{MemoryStore, PaymentStorage, SqueakStorage};
use sqk_types::network::Network;
use sqk_types::{
    ControllerP2PMessage, InterestFilter, Inventory, Offer, PaymentFailureReason, PeerAddress,
    ReceivedOffer, Squeak, SqueakBundle, SqueakHash,
};

use crate::{Controller, ControllerConfig, NodeHubs};

const PRICE_MSAT: u64 = 5_000;

fn config() -> ControllerConfig {
    ControllerConfig {
        network: Network::Simnet,
        price_msat: PRICE_MSAT,
        external_host: "node.example.com".into(),
        external_port: 18666,
        block_range_window: 100,
    }
}

fn controller(
    store: MemoryStore,
    p2p: MockHandle,
    lightning: MockLightningClient,
) -> Controller<MemoryStore, MockHandle, MockLightningClient> {
    let mut bus = EventBus::default();
    bus.register::<sqk_types::ControllerMessage>(None);

    Controller::new(
        &bus,
        store,
        Arc::new(lightning),
        p2p,
        NodeHubs::new(),
        config(),
    )
}

fn gen_header(height: u32) -> BlockHeader {
    let mut header = BlockHeader {
        version: Version::from_consensus(4),
        prev_blockhash: BlockHash::all_zeros(),
        merkle_root: TxMerkleNode::all_zeros(),
        time: 1_600_000_000 + height,
        bits: CompactTarget::from_consensus(0x207fffff),
        nonce: 0,
    };

    // A lax target still rejects roughly half of all hashes.
    while header.validate_pow(header.target()).is_err() {
        header.nonce += 1;
    }
    header
}

fn gen_bundle(signing_key: &SecretKey, content: &str, height: u32) -> SqueakBundle {
    let header = gen_header(height);
    let squeak = Squeak::make(
        signing_key,
        Network::Simnet,
        content,
        height,
        header.block_hash(),
        None,
        now() as u32,
    )
    .unwrap()
    .0;

    SqueakBundle::new(squeak, header)
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn received_offer(bundle: &SqueakBundle, price_msat: u64) -> ReceivedOffer {
    ReceivedOffer {
        offer: Offer {
            squeak_hash: bundle.hash(),
            price_msat,
            payment_request: "lnsb50u1pexample".into(),
            host: "seller.example.com".into(),
            port: 18666,
            node_pubkey: "02aabb".into(),
            expiry: 3600,
            invoice_timestamp: now(),
        },
        peer_address: PeerAddress::new(Network::Simnet, "127.0.0.1", 18666),
        payment_hash: bundle.squeak.data_key,
        decoded_at: now(),
    }
}

#[tokio::test]
async fn inv_requests_only_missing_squeaks() {
    let store = MemoryStore::new();
    let key = SecretKey::new(&mut thread_rng());
    let known = gen_bundle(&key, "already here", 5);
    let missing_hash = SqueakHash::from_byte_array([7u8; 32]);

    store
        .insert_squeak(&known.squeak, &known.header)
        .await
        .unwrap();

    let sender = "127.0.0.1:40001".parse().unwrap();
    let mut p2p = MockHandle::new();
    p2p.expect_send_get_squeaks()
        .with(eq(vec![Inventory::Squeak(missing_hash)]), eq(sender))
        .times(1)
        .returning(|_, _| Ok(()));

    let mut controller = controller(store, p2p, MockLightningClient::new());

    controller
        .handle_p2p_msg(ControllerP2PMessage::Inv {
            inv: vec![
                Inventory::Squeak(known.hash()),
                Inventory::Squeak(missing_hash),
            ],
            sender,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn served_squeaks_carry_no_decryption_key() {
    let store = MemoryStore::new();
    let key = SecretKey::new(&mut thread_rng());
    let bundle = gen_bundle(&key, "for sale", 5);

    // The author's own copy is stored unlocked.
    assert!(bundle.squeak.is_unlocked());
    store
        .insert_squeak(&bundle.squeak, &bundle.header)
        .await
        .unwrap();

    let sender = "127.0.0.1:40002".parse().unwrap();
    let mut p2p = MockHandle::new();
    p2p.expect_send_squeaks()
        .withf(|bundles: &Vec<SqueakBundle>, _| {
            bundles.len() == 1 && !bundles[0].squeak.is_unlocked()
        })
        .times(1)
        .returning(|_, _| Ok(()));

    let mut controller = controller(store, p2p, MockLightningClient::new());

    controller
        .handle_p2p_msg(ControllerP2PMessage::GetSqueaks {
            inv: vec![Inventory::Squeak(bundle.hash())],
            sender,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn saved_squeak_is_pushed_to_matching_subscribers() {
    let store = MemoryStore::new();
    let key = SecretKey::new(&mut thread_rng());
    let bundle = gen_bundle(&key, "fan out", 5);
    let subscriber = "127.0.0.1:40003".parse().unwrap();

    let mut p2p = MockHandle::new();
    p2p.expect_send_squeaks()
        .withf(move |bundles: &Vec<SqueakBundle>, addr| {
            bundles.len() == 1 && *addr == subscriber
        })
        .times(1)
        .returning(|_, _| Ok(()));
    p2p.expect_send_inv().times(1).returning(|_| Ok(()));

    let mut controller = controller(store, p2p, MockLightningClient::new());

    controller
        .handle_p2p_msg(ControllerP2PMessage::Subscribe {
            filter: InterestFilter {
                addresses: vec![bundle.squeak.author_address.clone()],
                min_block: 0,
                max_block: 100,
            },
            sender: subscriber,
        })
        .await
        .unwrap();

    let hash = controller.save_downloaded_squeak(&bundle).await.unwrap();
    assert_eq!(hash, Some(bundle.hash()));

    // Saving the same squeak again is a no-op: no second push.
    let again = controller.save_downloaded_squeak(&bundle).await.unwrap();
    assert_eq!(again, None);
}

#[tokio::test]
async fn unsubscribed_peer_gets_no_push() {
    let store = MemoryStore::new();
    let key = SecretKey::new(&mut thread_rng());
    let bundle = gen_bundle(&key, "quiet", 5);
    let subscriber = "127.0.0.1:40004".parse().unwrap();

    let mut p2p = MockHandle::new();
    p2p.expect_send_inv().times(1).returning(|_| Ok(()));

    let mut controller = controller(store, p2p, MockLightningClient::new());

    let filter = InterestFilter {
        addresses: vec![bundle.squeak.author_address.clone()],
        min_block: 0,
        max_block: 100,
    };
    controller
        .handle_p2p_msg(ControllerP2PMessage::Subscribe {
            filter: filter.clone(),
            sender: subscriber,
        })
        .await
        .unwrap();
    controller
        .handle_p2p_msg(ControllerP2PMessage::Unsubscribe {
            filter,
            sender: subscriber,
        })
        .await
        .unwrap();

    controller.save_downloaded_squeak(&bundle).await.unwrap();
}

#[tokio::test]
async fn tampered_squeak_is_dropped_silently() {
    let store = MemoryStore::new();
    let key = SecretKey::new(&mut thread_rng());
    let mut bundle = gen_bundle(&key, "tampered", 5);
    bundle.squeak.encrypted_content[0] ^= 0xff;

    let controller = controller(store.clone(), MockHandle::new(), MockLightningClient::new());

    let saved = controller.save_downloaded_squeak(&bundle).await.unwrap();
    assert_eq!(saved, None);
    assert_eq!(store.number_of_squeaks().await.unwrap(), 0);
}

#[tokio::test]
async fn get_offer_serves_invoice_backed_by_the_squeak_key() {
    let store = MemoryStore::new();
    let key = SecretKey::new(&mut thread_rng());
    let bundle = gen_bundle(&key, "buy me", 5);
    let secret = bundle.squeak.decryption_key.unwrap();
    let hash = bundle.hash();

    store
        .insert_squeak(&bundle.squeak, &bundle.header)
        .await
        .unwrap();

    let mut lightning = MockLightningClient::new();
    lightning
        .expect_add_invoice()
        .with(eq(secret), eq(PRICE_MSAT), eq(3600u32))
        .times(1)
        .returning(move |_, _, _| {
            Ok(AddedInvoice {
                payment_request: "lnsb50u1pexample".into(),
                payment_hash: [9u8; 32],
                add_index: 1,
            })
        });
    lightning.expect_get_info().times(1).returning(|| {
        Ok(NodeInfo {
            identity_pubkey: "02seller".into(),
            alias: "seller".into(),
            block_height: 10,
            block_hash: "00".repeat(32),
            synced_to_chain: true,
        })
    });

    let sender = "127.0.0.1:40005".parse().unwrap();
    let mut p2p = MockHandle::new();
    p2p.expect_send_offer()
        .withf(move |offer: &Offer, addr| {
            offer.squeak_hash == hash
                && offer.price_msat == PRICE_MSAT
                && offer.node_pubkey == "02seller"
                && offer.host == "node.example.com"
                && *addr == sender
        })
        .times(1)
        .returning(|_, _| Ok(()));

    let mut controller = controller(store, p2p, lightning);

    controller
        .handle_p2p_msg(ControllerP2PMessage::GetOffer {
            squeak_hash: hash,
            sender,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn locked_squeak_is_never_offered() {
    let store = MemoryStore::new();
    let key = SecretKey::new(&mut thread_rng());
    let bundle = gen_bundle(&key, "not mine to sell", 5).without_decryption_key();

    store
        .insert_squeak(&bundle.squeak, &bundle.header)
        .await
        .unwrap();

    // No expectations: neither the invoice nor the offer should happen.
    let mut controller = controller(store, MockHandle::new(), MockLightningClient::new());

    controller
        .handle_p2p_msg(ControllerP2PMessage::GetOffer {
            squeak_hash: bundle.hash(),
            sender: "127.0.0.1:40006".parse().unwrap(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn pay_offer_unlocks_the_squeak() {
    let store = MemoryStore::new();
    let key = SecretKey::new(&mut thread_rng());
    let bundle = gen_bundle(&key, "pay to read", 5);
    let secret = bundle.squeak.decryption_key.unwrap();
    let locked = bundle.without_decryption_key();

    store
        .insert_squeak(&locked.squeak, &locked.header)
        .await
        .unwrap();

    let offer = received_offer(&bundle, PRICE_MSAT);

    let mut lightning = MockLightningClient::new();
    lightning
        .expect_send_payment()
        .times(1)
        .returning(move |_, _| {
            Ok(PaymentResult {
                preimage: secret,
                amount_msat: PRICE_MSAT,
                fee_msat: 10,
            })
        });

    let controller = controller(store.clone(), MockHandle::new(), lightning);

    let payment = controller.pay_offer(&offer).await.unwrap();
    assert!(payment.settled);
    assert_eq!(payment.preimage, Some(secret));

    let unlocked = store.get_squeak(&bundle.hash()).await.unwrap().unwrap();
    assert!(unlocked.is_unlocked());
    assert_eq!(unlocked.content().as_deref(), Some("pay to read"));

    assert!(store
        .get_settled_sent_payment(&offer.payment_hash)
        .await
        .unwrap()
        .is_some());

    // Paying the same offer again is refused.
    assert!(controller.pay_offer(&offer).await.is_err());
}

#[tokio::test]
async fn preimage_mismatch_is_recorded_and_surfaced() {
    let store = MemoryStore::new();
    let key = SecretKey::new(&mut thread_rng());
    let bundle = gen_bundle(&key, "cheated", 5);
    let locked = bundle.without_decryption_key();

    store
        .insert_squeak(&locked.squeak, &locked.header)
        .await
        .unwrap();

    let offer = received_offer(&bundle, PRICE_MSAT);

    let mut lightning = MockLightningClient::new();
    lightning
        .expect_send_payment()
        .times(1)
        .returning(|_, _| {
            Ok(PaymentResult {
                preimage: [0u8; 32],
                amount_msat: PRICE_MSAT,
                fee_msat: 10,
            })
        });

    let controller = controller(store.clone(), MockHandle::new(), lightning);

    assert!(controller.pay_offer(&offer).await.is_err());

    let payments = store.get_sent_payments(10).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert!(!payments[0].settled);
    assert_eq!(
        payments[0].failure_reason,
        Some(PaymentFailureReason::PreimageMismatch)
    );

    let squeak = store.get_squeak(&bundle.hash()).await.unwrap().unwrap();
    assert!(!squeak.is_unlocked());
}

#[tokio::test]
async fn expired_offer_is_not_paid() {
    let store = MemoryStore::new();
    let key = SecretKey::new(&mut thread_rng());
    let bundle = gen_bundle(&key, "too late", 5);
    let locked = bundle.without_decryption_key();

    store
        .insert_squeak(&locked.squeak, &locked.header)
        .await
        .unwrap();

    let mut offer = received_offer(&bundle, PRICE_MSAT);
    offer.offer.invoice_timestamp = now() - 7200;

    // No send_payment expectation: the payment must never be attempted.
    let controller = controller(store.clone(), MockHandle::new(), MockLightningClient::new());

    assert!(controller.pay_offer(&offer).await.is_err());

    let payments = store.get_sent_payments(10).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(
        payments[0].failure_reason,
        Some(PaymentFailureReason::InvoiceExpired)
    );
}

#[tokio::test]
async fn bad_received_offer_is_rejected() {
    let store = MemoryStore::new();
    let key = SecretKey::new(&mut thread_rng());
    let bundle = gen_bundle(&key, "mismatched", 5);
    let locked = bundle.without_decryption_key();

    store
        .insert_squeak(&locked.squeak, &locked.header)
        .await
        .unwrap();

    let mut lightning = MockLightningClient::new();
    lightning
        .expect_decode_payment_request()
        .times(1)
        .returning(|_| {
            Ok(lightning_client::DecodedPaymentRequest {
                // A hash that doesn't commit to the squeak's key.
                payment_hash: [1u8; 32],
                amount_msat: PRICE_MSAT,
                node_pubkey: "02aabb".into(),
                expiry: 3600,
                timestamp: now(),
            })
        });

    let controller = controller(store.clone(), MockHandle::new(), lightning);
    let offer = received_offer(&bundle, PRICE_MSAT).offer;
    let peer = PeerAddress::new(Network::Simnet, "127.0.0.1", 18666);

    assert!(controller
        .decode_received_offer(offer, peer.clone())
        .await
        .is_err());
}
