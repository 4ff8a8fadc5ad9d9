//! Scripted gateway and device for the management client tests.

use crate::addressing::{Address, IndividualAddress};
use crate::configuration::ConnectionConfig;
use crate::connection::Connection;
use crate::net::mock_transport::MockTransport;
use crate::protocol::apdu::{Apdu, Tpci};
use crate::protocol::cemi::{CemiMessageCode, LData};
use crate::protocol::frame::Hpai;
use crate::protocol::registry::ServiceRegistry;
use crate::protocol::services::{
    ConnectResponse, ConnectionHeader, ConnectionResponseData, Service, TunnelingAck,
    TunnelingRequest,
};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::future::Future;
use embassy_futures::block_on;
use embassy_futures::select::{select, Either};
use embassy_time::Duration;

pub(crate) const CHANNEL: u8 = 0x11;

pub(crate) fn device() -> IndividualAddress {
    IndividualAddress::new(1, 1, 5).unwrap()
}

pub(crate) fn tunnel_address() -> IndividualAddress {
    IndividualAddress::new(1, 1, 250).unwrap()
}

pub(crate) fn connection() -> Connection<MockTransport> {
    let config = ConnectionConfig::new(MockTransport::GATEWAY)
        .with_response_timeout(Duration::from_millis(100))
        .with_heartbeat_interval(Duration::from_secs(3600));
    Connection::new(MockTransport::new(), config, Arc::new(ServiceRegistry::knxnet_ip()))
}

/// `L_Data.ind` from `source` to the tunnel address
pub(crate) fn indication(source: IndividualAddress, tpci: Tpci, apdu: Option<Apdu>) -> LData {
    LData::new(
        CemiMessageCode::LDataInd,
        source,
        Address::Individual(tunnel_address()),
        tpci,
        apdu,
    )
    .unwrap()
}

pub(crate) fn from_device(tpci: Tpci, apdu: Option<Apdu>) -> LData {
    indication(device(), tpci, apdu)
}

fn inject(conn: &Connection<MockTransport>, service: impl Into<Service>) {
    let bytes = conn.registry().encode(service).unwrap();
    conn.transport().inject(bytes).unwrap();
}

/// Gateway that accepts the tunnel, acks every tunneling request and
/// forwards whatever `device` answers to each bus frame.
async fn gateway(conn: &Connection<MockTransport>, mut device: impl FnMut(&LData) -> Vec<LData>) {
    let mut sequence = 0u8;
    loop {
        let (bytes, _) = conn.transport().next_sent().await;
        match conn.registry().decode(&bytes).unwrap().into_service() {
            Service::ConnectRequest(_) => inject(
                conn,
                ConnectResponse::accepted(
                    CHANNEL,
                    Hpai::NAT,
                    ConnectionResponseData::Tunnel {
                        address: tunnel_address(),
                    },
                ),
            ),
            Service::TunnelingRequest(request) => {
                inject(conn, TunnelingAck { header: request.header });
                let Some(ldata) = request.cemi.as_ldata() else {
                    continue;
                };
                for reply in device(ldata) {
                    inject(
                        conn,
                        TunnelingRequest {
                            header: ConnectionHeader::new(CHANNEL, sequence),
                            cemi: reply.into(),
                        },
                    );
                    sequence = sequence.wrapping_add(1);
                }
            }
            _ => {}
        }
    }
}

/// Run `test` against a connected tunnel whose bus behaves like `device`.
pub(crate) fn with_device<F: Future>(
    conn: &Connection<MockTransport>,
    device: impl FnMut(&LData) -> Vec<LData>,
    test: F,
) -> F::Output {
    let session = async {
        conn.connect().await.unwrap();
        test.await
    };
    match block_on(select(conn.run(), select(gateway(conn, device), session))) {
        Either::Second(Either::Second(output)) => output,
        _ => panic!("driver or gateway stopped"),
    }
}
