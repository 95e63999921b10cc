//! End-to-end handshake and messaging scenarios across two transports.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use sage_crypto::keys::IdentityKeyPair;
use sage_proto::handshake::Complete;
use sage_proto::Invitation;
use sage_session::SessionStatus;
use sage_transport::{Transport, TransportConfig, TransportError};

fn transport(did: &str) -> Transport {
    Transport::new(did, IdentityKeyPair::generate(), TransportConfig::default())
}

fn transport_with(did: &str, config: TransportConfig) -> Transport {
    Transport::new(did, IdentityKeyPair::generate(), config)
}

/// Ferry all four records between initiator and responder.
fn run_handshake(initiator: &Transport, responder: &Transport) {
    let invitation = initiator.connect(responder.local_did()).unwrap();
    let request = responder.handle_invitation(&invitation).unwrap();
    let response = initiator
        .handle_request(&request, responder.identity_public())
        .unwrap();
    let complete = responder
        .handle_response(&response, initiator.identity_public())
        .unwrap();
    initiator
        .handle_complete(&complete, responder.identity_public())
        .unwrap();
}

#[test]
fn full_handshake_and_one_message() {
    let alice = transport("did:sage:alice");
    let bob = transport("did:sage:bob");

    let (tx, rx) = mpsc::channel();
    bob.set_message_handler(move |inbound| {
        tx.send(inbound).unwrap();
    });

    run_handshake(&alice, &bob);

    let alice_session = alice.get_session("did:sage:bob").unwrap();
    let bob_session = bob.get_session("did:sage:alice").unwrap();
    assert!(alice_session.is_active());
    assert!(bob_session.is_active());
    // Both sides hold byte-identical 32-byte session keys.
    assert_eq!(
        alice_session.session_key.as_ref().unwrap().as_bytes(),
        bob_session.session_key.as_ref().unwrap().as_bytes()
    );

    let payload = json!({"type": "greeting", "text": "Hello Bob!"});
    let message = alice.send_message("did:sage:bob", &payload).unwrap();
    let received = bob
        .receive_message(&message, alice.identity_public())
        .unwrap();
    assert_eq!(received, payload);

    let inbound = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(inbound.from_did, "did:sage:alice");
    assert_eq!(inbound.payload, payload);

    alice.close();
    bob.close();
}

#[test]
fn concurrent_peers_establish_distinct_sessions() {
    let initiator = Arc::new(transport("did:sage:initiator"));
    let peers: Vec<Arc<Transport>> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|suffix| Arc::new(transport(&format!("did:sage:peer{suffix}"))))
        .collect();

    let handles: Vec<_> = peers
        .iter()
        .map(|peer| {
            let initiator = initiator.clone();
            let peer = peer.clone();
            std::thread::spawn(move || run_handshake(&initiator, &peer))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let sessions = initiator.list_sessions();
    assert_eq!(sessions.len(), 5);
    assert!(sessions.iter().all(|s| s.is_active()));

    // Session keys are pairwise distinct.
    let keys: Vec<[u8; 32]> = sessions
        .iter()
        .map(|s| *s.session_key.as_ref().unwrap().as_bytes())
        .collect();
    for i in 0..keys.len() {
        for j in (i + 1)..keys.len() {
            assert_ne!(keys[i], keys[j]);
        }
    }

    initiator.close();
    for peer in &peers {
        peer.close();
    }
}

#[test]
fn expired_session_refuses_messages() {
    let mut config = TransportConfig::default();
    config.session_ttl = Duration::from_millis(100);
    let alice = transport_with("did:sage:alice", config);
    let bob = transport("did:sage:bob");

    run_handshake(&alice, &bob);
    assert!(alice.get_session("did:sage:bob").unwrap().is_active());

    std::thread::sleep(Duration::from_millis(200));

    match alice.get_session("did:sage:bob") {
        Err(TransportError::SessionExpired { .. }) => {}
        Ok(session) => assert!(!session.is_active()),
        Err(other) => panic!("unexpected error: {other}"),
    }
    let err = alice
        .send_message("did:sage:bob", &json!({"late": true}))
        .unwrap_err();
    assert!(matches!(err, TransportError::SessionExpired { .. }));

    alice.close();
    bob.close();
}

#[test]
fn replayed_invitation_is_rejected() {
    let alice = transport("did:sage:alice");
    let bob = transport("did:sage:bob");

    let invitation = alice.connect("did:sage:bob").unwrap();
    bob.handle_invitation(&invitation).unwrap();
    let err = bob.handle_invitation(&invitation).unwrap_err();
    assert!(matches!(
        err,
        TransportError::ReplayDetected { .. } | TransportError::HandshakeStateMismatch { .. }
    ));

    alice.close();
    bob.close();
}

#[test]
fn replayed_app_message_is_rejected() {
    let alice = transport("did:sage:alice");
    let bob = transport("did:sage:bob");
    run_handshake(&alice, &bob);

    let message = alice
        .send_message("did:sage:bob", &json!({"seq": 1}))
        .unwrap();
    bob.receive_message(&message, alice.identity_public())
        .unwrap();
    let err = bob
        .receive_message(&message, alice.identity_public())
        .unwrap_err();
    assert!(matches!(err, TransportError::ReplayDetected { .. }));

    alice.close();
    bob.close();
}

#[test]
fn tampered_request_payload_is_rejected() {
    let alice = transport("did:sage:alice");
    let bob = transport("did:sage:bob");

    let invitation = alice.connect("did:sage:bob").unwrap();
    let mut request = bob.handle_invitation(&invitation).unwrap();

    // Flip one bit of the sealed payload. The ciphertext sits under the
    // signature, so verification fails before the AEAD is even tried.
    let mut raw = request.encrypted_payload.ciphertext.clone().into_bytes();
    raw[0] ^= 0x02;
    request.encrypted_payload.ciphertext = String::from_utf8(raw).unwrap();

    let err = alice
        .handle_request(&request, bob.identity_public())
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::SignatureInvalid | TransportError::AuthFailure
    ));

    alice.close();
    bob.close();
}

#[test]
fn wrong_verification_key_fails_before_decryption() {
    let alice = transport("did:sage:alice");
    let bob = transport("did:sage:bob");
    let stranger = IdentityKeyPair::generate();

    let invitation = alice.connect("did:sage:bob").unwrap();
    let request = bob.handle_invitation(&invitation).unwrap();

    let err = alice
        .handle_request(&request, &stranger.public)
        .unwrap_err();
    assert!(matches!(err, TransportError::SignatureInvalid));

    alice.close();
    bob.close();
}

#[test]
fn session_key_never_appears_on_the_wire() {
    let alice = transport("did:sage:alice");
    let bob = transport("did:sage:bob");

    let invitation = alice.connect("did:sage:bob").unwrap();
    let request = bob.handle_invitation(&invitation).unwrap();
    let response = alice
        .handle_request(&request, bob.identity_public())
        .unwrap();
    let complete = bob
        .handle_response(&response, alice.identity_public())
        .unwrap();
    alice
        .handle_complete(&complete, bob.identity_public())
        .unwrap();

    let key_b64 = bob
        .get_session("did:sage:alice")
        .unwrap()
        .session_key
        .as_ref()
        .unwrap()
        .to_b64();

    for wire in [
        serde_json::to_string(&invitation).unwrap(),
        serde_json::to_string(&request).unwrap(),
        serde_json::to_string(&response).unwrap(),
        serde_json::to_string(&complete).unwrap(),
    ] {
        assert!(!wire.contains(&key_b64));
    }

    alice.close();
    bob.close();
}

#[test]
fn stale_timestamp_is_rejected() {
    let alice = transport("did:sage:alice");
    let bob = transport("did:sage:bob");

    let mut invitation: Invitation = alice.connect("did:sage:bob").unwrap();
    invitation.timestamp = chrono::Utc::now() - chrono::Duration::minutes(10);
    let err = bob.handle_invitation(&invitation).unwrap_err();
    assert!(matches!(err, TransportError::TimestampSkew { .. }));

    alice.close();
    bob.close();
}

#[test]
fn initiator_handshake_times_out() {
    let mut config = TransportConfig::default();
    config.handshake_timeout = Duration::from_millis(10);
    let alice = transport_with("did:sage:alice", config);
    let bob = transport("did:sage:bob");

    let invitation = alice.connect("did:sage:bob").unwrap();
    let request = bob.handle_invitation(&invitation).unwrap();

    std::thread::sleep(Duration::from_millis(50));
    let err = alice
        .handle_request(&request, bob.identity_public())
        .unwrap_err();
    assert!(matches!(err, TransportError::Timeout { .. }));

    alice.close();
    bob.close();
}

#[test]
fn out_of_order_records_are_rejected() {
    let alice = transport("did:sage:alice");
    let bob = transport("did:sage:bob");

    let invitation = alice.connect("did:sage:bob").unwrap();
    let request = bob.handle_invitation(&invitation).unwrap();
    let response = alice
        .handle_request(&request, bob.identity_public())
        .unwrap();

    // Alice already answered the Request; a second copy is out of order.
    let err = alice
        .handle_request(&request, bob.identity_public())
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::UnexpectedPhase { .. } | TransportError::ReplayDetected { .. }
    ));

    // A Complete before Bob saw the Response is equally out of order.
    let premature = Complete {
        phase: sage_proto::HandshakePhase::Complete,
        session_id: request.session_id.clone(),
        from_did: "did:sage:bob".into(),
        to_did: "did:sage:alice".into(),
        encrypted_payload: response.encrypted_payload.clone(),
        signature: None,
        timestamp: chrono::Utc::now(),
    };
    let err = alice
        .handle_complete(&premature, bob.identity_public())
        .unwrap_err();
    assert!(matches!(err, TransportError::UnexpectedPhase { .. }));

    let complete = bob
        .handle_response(&response, alice.identity_public())
        .unwrap();
    alice
        .handle_complete(&complete, bob.identity_public())
        .unwrap();

    alice.close();
    bob.close();
}

#[test]
fn disconnect_allows_a_fresh_handshake() {
    let alice = transport("did:sage:alice");
    let bob = transport("did:sage:bob");

    run_handshake(&alice, &bob);
    let first = alice.get_session("did:sage:bob").unwrap();

    alice.disconnect("did:sage:bob").unwrap();
    bob.disconnect("did:sage:alice").unwrap();
    assert!(alice.get_session("did:sage:bob").is_err());

    run_handshake(&alice, &bob);
    let second = alice.get_session("did:sage:bob").unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.status, SessionStatus::Active);

    alice.close();
    bob.close();
}

#[test]
fn reconnect_is_refused_while_session_is_active() {
    let alice = transport("did:sage:alice");
    let bob = transport("did:sage:bob");
    run_handshake(&alice, &bob);

    let err = alice.connect("did:sage:bob").unwrap_err();
    assert!(matches!(err, TransportError::HandshakeStateMismatch { .. }));

    alice.close();
    bob.close();
}
