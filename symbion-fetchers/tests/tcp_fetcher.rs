use std::sync::Arc;
use std::time::Duration;

use symbion_devkit::frame_helpers::{self, AGENT_OUTPUT, SECRET};
use symbion_devkit::{FakeConnector, PassthroughTls, RefusingConnector, StubFileCache, TestHarness};
use symbion_fetchers::fetchers::tcp::{TcpFetcher, TcpParams};
use symbion_fetchers::protocol::{CompressionType, TcpEncryptionHandling, TransportProtocol};
use symbion_fetchers::{get_raw_data, FetchError, Fetcher, FetcherState, HostName, MaxAge, Mode, RawData, RawDataCache};
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn params() -> TcpParams {
    TcpParams::new(HostName::new("heute"), "127.0.0.1", CONNECT_TIMEOUT)
}

fn fetcher(params: TcpParams, connector: &FakeConnector) -> TcpFetcher {
    TcpFetcher::new(params)
        .with_connector(Arc::new(connector.clone()))
        .with_tls(Arc::new(PassthroughTls::new(connector.log())))
}

fn fetch(params: TcpParams, connector: &FakeConnector) -> Result<RawData, FetchError> {
    get_raw_data(&StubFileCache::new(), &mut fetcher(params, connector), Mode::Checking)
}

fn registered(mut params: TcpParams) -> TcpParams {
    params.controller_uuid = Some(Uuid::nil());
    params
}

#[test]
fn plain_output_is_returned_with_its_marker() {
    let connector = FakeConnector::new(frame_helpers::plain_frame(AGENT_OUTPUT));
    let raw = fetch(params(), &connector).unwrap();
    assert_eq!(raw, RawData::Agent(AGENT_OUTPUT.to_vec()));

    let log = connector.log().lock().clone();
    assert_eq!(log.connected_to.len(), 1);
    assert!(log.read_timeout_cleared);
    assert_eq!(log.keepalive.map(|k| k.dead_peer_after()), Some(Duration::from_secs(150)));
    assert_eq!(log.shutdowns, 1);
}

#[test]
fn tls_output_is_unwrapped_and_decompressed() {
    for compression in [CompressionType::Uncompressed, CompressionType::Zlib] {
        let frame = frame_helpers::tls_frame(compression, TransportProtocol::Plain, AGENT_OUTPUT).unwrap();
        let connector = FakeConnector::new(frame);
        let raw = fetch(registered(params()), &connector).unwrap();
        assert_eq!(raw, RawData::Agent(AGENT_OUTPUT.to_vec()), "{compression:?}");
        assert_eq!(connector.log().lock().tls_server_names, vec![Uuid::nil().to_string()]);
    }
}

#[test]
fn legacy_encrypted_output_is_decrypted() {
    let mut with_secret = params();
    with_secret.pre_shared_secret = Some(SECRET.into());

    let pbkdf2 = frame_helpers::frame(TransportProtocol::Pbkdf2, &frame_helpers::pbkdf2_ciphertext().unwrap());
    assert_eq!(
        fetch(with_secret.clone(), &FakeConnector::new(pbkdf2)).unwrap(),
        RawData::Agent(AGENT_OUTPUT.to_vec())
    );

    let sha256 = frame_helpers::frame(TransportProtocol::Sha256, &frame_helpers::sha256_ciphertext().unwrap());
    assert_eq!(
        fetch(with_secret, &FakeConnector::new(sha256)).unwrap(),
        RawData::Agent(AGENT_OUTPUT.to_vec())
    );
}

#[test]
fn encrypted_output_inside_tls_is_decrypted() {
    let mut params = registered(params());
    params.pre_shared_secret = Some(SECRET.into());
    let frame = frame_helpers::tls_frame(
        CompressionType::Zlib,
        TransportProtocol::Pbkdf2,
        &frame_helpers::pbkdf2_ciphertext().unwrap(),
    )
    .unwrap();
    assert_eq!(fetch(params, &FakeConnector::new(frame)).unwrap(), RawData::Agent(AGENT_OUTPUT.to_vec()));
}

#[test]
fn encrypted_output_without_secret_is_an_error() {
    let pbkdf2 = frame_helpers::frame(TransportProtocol::Pbkdf2, &frame_helpers::pbkdf2_ciphertext().unwrap());
    let err = fetch(params(), &FakeConnector::new(pbkdf2)).unwrap_err();
    assert!(!err.is_timeout());
    assert!(err.message().contains("no secret"), "{err}");
}

#[test]
fn wrong_secret_does_not_yield_output() {
    let mut params = params();
    params.pre_shared_secret = Some("wrong".into());
    let pbkdf2 = frame_helpers::frame(TransportProtocol::Pbkdf2, &frame_helpers::pbkdf2_ciphertext().unwrap());
    match fetch(params, &FakeConnector::new(pbkdf2)) {
        Ok(raw) => assert_ne!(raw, RawData::Agent(AGENT_OUTPUT.to_vec())),
        Err(err) => assert!(!err.is_timeout()),
    }
}

#[test]
fn connect_timeout_bounds_connecting_only() {
    // (connect wait, data wait, times out)
    let cases = [
        (0, 0, false),
        (50, 0, true),
        (0, 120, false),
        (0, 150, false),
        (0, 151, true),
    ];
    for (connect_wait, data_wait, times_out) in cases {
        let connector = FakeConnector::new(frame_helpers::plain_frame(AGENT_OUTPUT))
            .with_waits(Duration::from_secs(connect_wait), Duration::from_secs(data_wait));
        let result = fetch(params(), &connector);
        match result {
            Ok(raw) => {
                assert!(!times_out, "({connect_wait}, {data_wait}) should time out");
                assert_eq!(raw, RawData::Agent(AGENT_OUTPUT.to_vec()));
            }
            Err(err) => {
                assert!(times_out, "({connect_wait}, {data_wait}) failed: {err}");
                assert!(err.is_timeout(), "({connect_wait}, {data_wait}) gave {err}");
            }
        }
    }
}

#[test]
fn encryption_policy_is_enforced() {
    let plain = frame_helpers::plain_frame(AGENT_OUTPUT);
    let pbkdf2 = frame_helpers::frame(TransportProtocol::Pbkdf2, &frame_helpers::pbkdf2_ciphertext().unwrap());
    let cases = [
        (plain.clone(), TcpEncryptionHandling::AnyEncrypted, false, "Refused: Encryption is enforced but agent output is plaintext"),
        (plain.clone(), TcpEncryptionHandling::TlsEncryptedOnly, false, "Refused: TLS is enforced but host is not using it"),
        (pbkdf2, TcpEncryptionHandling::TlsEncryptedOnly, false, "Refused: TLS is enforced but host is not using it"),
        (plain, TcpEncryptionHandling::AnyAndPlain, true, "Refused: Host is registered for TLS but not using it"),
    ];
    for (frame, handling, is_registered, message) in cases {
        let mut params = params();
        params.encryption_handling = handling;
        params.pre_shared_secret = Some(SECRET.into());
        if is_registered {
            params = registered(params);
        }
        let err = fetch(params, &FakeConnector::new(frame)).unwrap_err();
        assert_eq!(err.message(), message);
        assert!(!err.is_timeout());
    }
}

#[test]
fn malformed_responses_are_fetcher_errors() {
    let cases: [(Vec<u8>, &str); 6] = [
        (Vec::new(), "Empty output from host 127.0.0.1:6556"),
        (b"xx garbage".to_vec(), "Unknown transport protocol: b'xx'"),
        (b"<<<short>>>\n".to_vec(), "Too short payload"),
        (b"99<<<check_mk>>>\nVersion: 2.2.0p1\n".to_vec(), "no decryption defined"),
        (frame_helpers::raw_tls_frame(7, 0, b"<<<check_mk>>>\n"), "Unsupported agent control version: 7"),
        (frame_helpers::raw_tls_frame(0, 9, b"<<<check_mk>>>\n"), "Unknown compression type: 9"),
    ];
    for (frame, message) in cases {
        let params = if frame.starts_with(b"16") { registered(params()) } else { params() };
        let err = fetch(params, &FakeConnector::new(frame)).unwrap_err();
        assert!(!err.is_timeout());
        assert!(err.message().contains(message), "expected {message:?}, got {err}");
    }
}

#[test]
fn tls_envelope_with_nothing_inside_is_empty_output() {
    let frame = frame_helpers::raw_tls_frame(0, 1, &frame_helpers::zlib(b"<<").unwrap());
    let err = fetch(registered(params()), &FakeConnector::new(frame)).unwrap_err();
    assert!(err.message().starts_with("Empty output"), "{err}");
}

#[test]
fn refused_connection_is_a_fetcher_error() {
    let mut fetcher = TcpFetcher::new(params()).with_connector(Arc::new(RefusingConnector));
    let err = get_raw_data(&StubFileCache::new(), &mut fetcher, Mode::Checking).unwrap_err();
    assert!(!err.is_timeout());
    assert!(err.message().contains("Connection refused"), "{err}");
}

#[test]
fn cache_hit_never_connects() {
    let cached = RawData::Agent(b"<<<cached>>>\nfrom disk\n".to_vec());
    let cache = StubFileCache::new().with_entry(Mode::Checking, cached.clone());
    let connector = FakeConnector::new(frame_helpers::plain_frame(AGENT_OUTPUT));
    let raw = get_raw_data(&cache, &mut fetcher(params(), &connector), Mode::Checking).unwrap();
    assert_eq!(raw, cached);
    assert!(connector.log().lock().connected_to.is_empty());
    assert!(cache.writes().is_empty());
}

#[test]
fn fresh_data_lands_in_the_file_cache() {
    let harness = TestHarness::new();
    let cache = harness.agent_cache("heute", MaxAge::unlimited());
    let connector = FakeConnector::new(frame_helpers::plain_frame(AGENT_OUTPUT));
    get_raw_data(&cache, &mut fetcher(params(), &connector), Mode::Discovery).unwrap();

    assert_eq!(std::fs::read(cache.make_path(Mode::Discovery)).unwrap(), AGENT_OUTPUT);
    assert_eq!(cache.read(Mode::Discovery).unwrap(), Some(RawData::Agent(AGENT_OUTPUT.to_vec())));
}

#[test]
fn transport_state_rebuilds_the_same_fetcher() {
    let mut params = registered(params());
    params.pre_shared_secret = Some(SECRET.into());
    params.encryption_handling = TcpEncryptionHandling::AnyEncrypted;
    let state = FetcherState::Tcp(params);

    let json = serde_json::to_string(&state).unwrap();
    let decoded: FetcherState = serde_json::from_str(&json).unwrap();
    let fetcher = Fetcher::from_transport_state(decoded, &Default::default());
    assert_eq!(fetcher.to_transport_state(), state);
    assert_eq!(fetcher.to_string(), "TcpFetcher(127.0.0.1:6556, host=heute)");
}
