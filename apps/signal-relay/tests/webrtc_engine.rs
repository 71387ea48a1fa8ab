use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::unfold;
use signal_core::{
    ChannelError, ConnectionState, Description, DescriptionType, Dispatcher, RegistryConfig,
    SessionRegistry, SignalPayload, SignalStream, SignalingMessage,
};
use signal_relay::rtc::WebRtcConnector;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;

#[test_timeout::timeout(30)]
async fn gathered_candidates_reach_the_client() {
    let dispatcher = Dispatcher::new();
    dispatcher.start();
    let connector = WebRtcConnector::new(&[], Handle::current()).expect("connector");
    let registry = SessionRegistry::new(
        dispatcher.clone(),
        Arc::new(connector),
        RegistryConfig::default(),
    );

    let (out_tx, mut outbound) = mpsc::unbounded_channel();
    let stream = SignalStream::new(dispatcher.clone(), registry.clone(), Box::new(out_tx));
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<SignalingMessage, ChannelError>>();
    let inbound = unfold(in_rx, |mut rx| async move {
        rx.recv().await.map(|message| (message, rx))
    });
    let reader = {
        let stream = Arc::clone(&stream);
        tokio::spawn(async move { stream.run(inbound).await })
    };

    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .expect("default codecs");
    let api = APIBuilder::new().with_media_engine(media_engine).build();
    let offerer = api
        .new_peer_connection(RTCConfiguration::default())
        .await
        .expect("offerer");
    let _channel = offerer
        .create_data_channel("signal", None)
        .await
        .expect("data channel");
    let offer = offerer.create_offer(None).await.expect("create offer");
    offerer
        .set_local_description(offer.clone())
        .await
        .expect("apply offer");

    in_tx
        .send(Ok(SignalingMessage::state(7, ConnectionState::New)))
        .expect("reader alive");
    in_tx
        .send(Ok(SignalingMessage::description(
            7,
            Description::new(offer.sdp, DescriptionType::Offer),
        )))
        .expect("reader alive");

    let deadline = Instant::now() + Duration::from_secs(15);
    let mut sent = Vec::new();
    while !sent
        .iter()
        .any(|message: &SignalingMessage| matches!(message.payload, SignalPayload::IceCandidate(_)))
    {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let message = tokio::time::timeout(remaining, outbound.recv())
            .await
            .expect("no local candidate reached the client")
            .expect("stream open");
        sent.push(message);
    }

    assert!(sent.iter().all(|message| message.session_id == 7));
    let SignalPayload::Description(answer) = &sent[0].payload else {
        panic!("expected the answer first, got {:?}", sent[0]);
    };
    assert_eq!(answer.kind, DescriptionType::Answer);
    let candidate = sent
        .iter()
        .find_map(|message| match &message.payload {
            SignalPayload::IceCandidate(candidate) => Some(candidate),
            _ => None,
        })
        .expect("candidate sent");
    assert!(candidate.is_valid());
    assert!(answer.sdp.contains(&format!("a=mid:{}", candidate.sdp_mid)));
    assert_eq!(candidate.sdp_mline_index, 0);

    stream.close();
    reader.await.expect("reader task");
    registry.close_all();
    dispatcher.shutdown();
    let _ = offerer.close().await;
}
