//! Device lifecycle tests
//!
//! Attach, open, detach and close through the registry, backed by the
//! simulated headset.
//!
//! Run with: `cargo test -p driver --test lifecycle_tests`

use common::test_utils::MockTransport;
use driver::{LifecycleError, LifecycleManager, MAX_DEVICES, SessionState};
use protocol::{Command, ProtocolError, UsbId, X800_ID, Z800_ID};

mod registry {
    use super::*;

    #[test]
    fn test_attach_assigns_nodes() {
        let lifecycle = LifecycleManager::default();

        assert_eq!(lifecycle.attach(Z800_ID, MockTransport::new()).unwrap(), 0);
        assert_eq!(lifecycle.attach(X800_ID, MockTransport::new()).unwrap(), 1);

        let devices = lifecycle.devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].node, "z800:0");
        assert_eq!(devices[0].minor, 155);
        assert_eq!(devices[0].id, Z800_ID);
        assert_eq!(devices[1].node, "z800:1");
        assert_eq!(devices[1].minor, 156);
        assert!(!devices[1].in_use);
    }

    #[test]
    fn test_unsupported_device_rejected() {
        let lifecycle = LifecycleManager::default();
        let other = UsbId::new(0x046d, 0xc52b);

        assert!(matches!(
            lifecycle.attach(other, MockTransport::new()),
            Err(LifecycleError::Unsupported(id)) if id == other
        ));
        assert!(lifecycle.devices().is_empty());
    }

    #[test]
    fn test_index_reused_after_detach() {
        let lifecycle = LifecycleManager::default();
        lifecycle.attach(Z800_ID, MockTransport::new()).unwrap();
        lifecycle.attach(Z800_ID, MockTransport::new()).unwrap();

        lifecycle.detach(0).unwrap();
        assert_eq!(lifecycle.attach(Z800_ID, MockTransport::new()).unwrap(), 0);
        assert_eq!(lifecycle.attach(Z800_ID, MockTransport::new()).unwrap(), 2);
    }

    #[test]
    fn test_registry_full() {
        let lifecycle = LifecycleManager::default();
        for _ in 0..MAX_DEVICES {
            lifecycle.attach(Z800_ID, MockTransport::new()).unwrap();
        }

        assert!(matches!(
            lifecycle.attach(Z800_ID, MockTransport::new()),
            Err(LifecycleError::NoFreeSlot { max: 16 })
        ));
    }

    #[test]
    fn test_unknown_index() {
        let lifecycle = LifecycleManager::default();
        assert!(matches!(
            lifecycle.open(3),
            Err(LifecycleError::NoDevice { index: 3 })
        ));
        assert!(matches!(
            lifecycle.detach(3),
            Err(LifecycleError::NoDevice { index: 3 })
        ));
    }
}

mod sessions {
    use super::*;

    #[test]
    fn test_open_is_exclusive() {
        let lifecycle = LifecycleManager::default();
        let index = lifecycle.attach(Z800_ID, MockTransport::new()).unwrap();

        let session = lifecycle.open(index).unwrap();
        assert!(lifecycle.devices()[0].in_use);
        assert!(matches!(
            lifecycle.open(index),
            Err(LifecycleError::Busy { index: 0 })
        ));

        lifecycle.close(session);
        assert!(!lifecycle.devices()[0].in_use);

        let session = lifecycle.open(index).unwrap();
        lifecycle.close(session);
    }

    #[test]
    fn test_dropped_session_frees_device() {
        let lifecycle = LifecycleManager::default();
        let index = lifecycle.attach(Z800_ID, MockTransport::new()).unwrap();

        drop(lifecycle.open(index).unwrap());
        assert!(lifecycle.open(index).is_ok());
    }

    #[test]
    fn test_detach_marks_open_session() {
        let mock = MockTransport::new();
        let lifecycle = LifecycleManager::default();
        let index = lifecycle.attach(Z800_ID, mock.clone()).unwrap();
        let session = lifecycle.open(index).unwrap();

        mock.unplug();
        lifecycle.detach(index).unwrap();

        assert_eq!(session.state(), SessionState::Detached);
        assert_eq!(
            session.write_command(Command::wake()),
            Err(ProtocolError::DeviceGone)
        );
        assert!(lifecycle.devices().is_empty());

        // The session outlives its device until its owner closes it
        lifecycle.close(session);
    }

    #[test]
    fn test_replug_allows_new_session() {
        let lifecycle = LifecycleManager::default();
        let index = lifecycle.attach(Z800_ID, MockTransport::new()).unwrap();
        let stale = lifecycle.open(index).unwrap();
        lifecycle.detach(index).unwrap();

        let mock = MockTransport::new();
        mock.set_eeprom(0, 0x09);
        let index = lifecycle.attach(Z800_ID, mock).unwrap();
        let fresh = lifecycle.open(index).unwrap();

        assert_eq!(fresh.request_eeprom_byte(0), Ok(0x09));
        assert_eq!(stale.request_eeprom_byte(0), Err(ProtocolError::DeviceGone));

        lifecycle.close(stale);
        lifecycle.close(fresh);
    }

    #[test]
    fn test_shutdown_detaches_everything() {
        let lifecycle = LifecycleManager::default();
        let index = lifecycle.attach(Z800_ID, MockTransport::new()).unwrap();
        let session = lifecycle.open(index).unwrap();

        lifecycle.shutdown();

        assert!(lifecycle.devices().is_empty());
        assert_eq!(session.state(), SessionState::Detached);
    }
}
