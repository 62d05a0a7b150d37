use std::sync::Arc;

use crate::client::ClientId;
use crate::message::Message;
use crate::protocol::qos::QoS;
use crate::session_store::SessionStore;

/// One delivery decided by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub client_id: ClientId,
    /// `min(published QoS, highest granted QoS among matching filters)`.
    pub qos: QoS,
}

/// Fans a published message out to the sessions subscribed to its topic.
#[derive(Debug, Clone)]
pub struct Router {
    sessions: Arc<SessionStore>,
}

impl Router {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }

    /// Each session appears at most once, however many of its filters match.
    /// Sessions are locked one at a time and only while their filters are
    /// tested.
    pub fn route(&self, message: &Message) -> Vec<Route> {
        self.sessions
            .snapshot()
            .into_iter()
            .filter_map(|(client_id, session)| {
                let granted = session.lock().matching_qos(&message.topic)?;
                Some(Route {
                    client_id,
                    qos: granted.min(message.qos),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::session::{ClientSession, SessionLimits};
    use parking_lot::Mutex;

    fn store_with(subscriptions: Vec<(&str, Vec<(&str, QoS)>)>) -> Arc<SessionStore> {
        let store = Arc::new(SessionStore::new());
        for (client_id, filters) in subscriptions {
            let id = ClientId::from(client_id);
            let mut session = ClientSession::new(id.clone(), true, SessionLimits::from(&BrokerConfig::default()));
            for (filter, qos) in filters {
                session.subscribe(filter, qos);
            }
            store.with_entry(&id, |slot| *slot = Some(Arc::new(Mutex::new(session))));
        }
        store
    }

    #[test]
    fn test_one_route_per_session_at_highest_qos() {
        let store = store_with(vec![
            ("a", vec![("home/#", QoS::AtMostOnce), ("home/+/temp", QoS::AtLeastOnce)]),
            ("b", vec![("home/kitchen/temp", QoS::ExactlyOnce)]),
            ("c", vec![("office/#", QoS::ExactlyOnce)]),
            ("d", vec![]),
        ]);
        let router = Router::new(store);
        let mut routes = router.route(&Message::new("home/kitchen/temp", &b"21.5"[..], QoS::ExactlyOnce, false));
        routes.sort_by(|x, y| x.client_id.cmp(&y.client_id));
        assert_eq!(
            routes,
            vec![
                Route {
                    client_id: ClientId::from("a"),
                    qos: QoS::AtLeastOnce
                },
                Route {
                    client_id: ClientId::from("b"),
                    qos: QoS::ExactlyOnce
                },
            ]
        );
    }

    #[test]
    fn test_publisher_qos_caps_delivery() {
        let store = store_with(vec![("a", vec![("#", QoS::ExactlyOnce)])]);
        let routes = Router::new(store).route(&Message::new("x", &b""[..], QoS::AtMostOnce, false));
        assert_eq!(routes[0].qos, QoS::AtMostOnce);
    }
}
