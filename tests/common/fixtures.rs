//! Log fixtures and an applier harness.
//!
//! `LogFixture` writes whole source transactions into a [`LogBuilder`];
//! `Harness` wires an applier to a [`MockTarget`], an in-memory progress
//! store and a channel queue.

use super::mock_target::MockTarget;
use log_applier::config::ApplierConfig;
use log_applier::reconstruct::{make_diff, row_image, RecordImage};
use log_applier::wal::{
    GidBitmapRecord, HeapAddress, LogBuilder, MemoryPageBuffer, RecordBody, RecoveryIndex,
    ReplDataRecord, ReplSchemaRecord, StoredPayload,
};
use log_applier::{
    Applier, ApplierState, ChannelQueue, DescriptorSender, Lsa, MemoryProgressStore,
    TransactionDescriptor,
};
use std::sync::Arc;
use std::time::Duration;

pub const APPLIER_ID: &str = "replica-1";

/// How long any wait in a test may take before it fails.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn heap_redo(rcv_index: RecoveryIndex, image: &RecordImage) -> RecordBody {
    RecordBody::Redo {
        rcv_index,
        address: HeapAddress { page_id: 7, slot: 1 },
        redo: StoredPayload::plain(image.encode()),
    }
}

pub fn data_record(op: u16, class_name: &str, key: &[u8], group_id: i32, target_lsa: Lsa) -> RecordBody {
    RecordBody::ReplicationData(ReplDataRecord {
        op,
        group_id,
        target_lsa,
        class_name: class_name.to_string(),
        key: key.to_vec(),
    })
}

pub fn descriptor(tran_id: i32, start: Lsa, commit: Lsa) -> TransactionDescriptor {
    TransactionDescriptor {
        transaction_id: tran_id,
        replication_start_lsa: start,
        transaction_start_lsa: start,
        committed_lsa: commit,
    }
}

/// Writes source transactions into a log image.
pub struct LogFixture {
    pub builder: LogBuilder,
}

impl LogFixture {
    pub fn new(page_size: usize, first_page_id: i64) -> Self {
        Self {
            builder: LogBuilder::new(page_size, first_page_id),
        }
    }

    /// Heap insert plus its replication record. Returns the first LSA written.
    pub fn insert(&mut self, tran: i32, class_name: &str, key: &[u8], group_id: i32, body: &[u8]) -> Lsa {
        let image = row_image(group_id, body);
        let heap = self
            .builder
            .append(tran, heap_redo(RecoveryIndex::HeapInsert, &image));
        self.builder
            .append(tran, data_record(1, class_name, key, group_id, heap));
        heap
    }

    /// Diff-encoded heap update plus its replication record.
    pub fn update(
        &mut self,
        tran: i32,
        class_name: &str,
        key: &[u8],
        group_id: i32,
        before: &[u8],
        after: &[u8],
    ) -> Lsa {
        let undo = row_image(group_id, before).encode();
        let redo = row_image(group_id, after).encode();
        let heap = self.builder.append(
            tran,
            RecordBody::UndoRedo {
                rcv_index: RecoveryIndex::HeapUpdate,
                address: HeapAddress { page_id: 7, slot: 2 },
                undo: StoredPayload::plain(undo.clone()),
                redo: StoredPayload::plain(make_diff(&undo, &redo)),
                diff: true,
            },
        );
        self.builder
            .append(tran, data_record(2, class_name, key, group_id, heap));
        heap
    }

    pub fn delete(&mut self, tran: i32, class_name: &str, key: &[u8], group_id: i32) -> Lsa {
        self.builder
            .append(tran, data_record(3, class_name, key, group_id, Lsa::NULL))
    }

    pub fn schema(&mut self, tran: i32, ddl: &str) -> Lsa {
        self.builder.append(
            tran,
            RecordBody::ReplicationSchema(ReplSchemaRecord {
                statement_type: 1,
                group_id: 0,
                object_name: "orders".to_string(),
                ddl: ddl.to_string(),
                db_user: "dba".to_string(),
            }),
        )
    }

    pub fn gid_update(&mut self, tran: i32, group_id: i32, enabled: bool, apply_locally: bool) -> Lsa {
        self.builder.append(
            tran,
            RecordBody::GidBitmapUpdate(GidBitmapRecord {
                migrator_id: 4,
                group_id,
                apply_locally,
                enabled,
            }),
        )
    }

    pub fn filler(&mut self, tran: i32) -> Lsa {
        self.builder.append(tran, RecordBody::Dummy)
    }

    pub fn commit(&mut self, tran: i32) -> Lsa {
        self.builder.append(tran, RecordBody::Commit { at_time: 1_700_000_000 })
    }

    pub fn abort(&mut self, tran: i32) -> Lsa {
        self.builder.append(tran, RecordBody::Abort { at_time: 1_700_000_000 })
    }

    pub fn build(&self) -> MemoryPageBuffer {
        self.builder.build()
    }
}

pub type TestApplier = Applier<MemoryPageBuffer, ChannelQueue, MockTarget, MemoryProgressStore>;

/// An applier wired to mocks.
pub struct Harness {
    pub applier: TestApplier,
    pub sender: DescriptorSender,
    pub target: Arc<MockTarget>,
    pub store: Arc<MemoryProgressStore>,
    pub buffer: Arc<MemoryPageBuffer>,
}

impl Harness {
    pub fn new(buffer: MemoryPageBuffer) -> Self {
        Self::with(buffer, ApplierConfig::for_testing(APPLIER_ID), MemoryProgressStore::new())
    }

    pub fn with(buffer: MemoryPageBuffer, config: ApplierConfig, store: MemoryProgressStore) -> Self {
        let (sender, queue) = ChannelQueue::bounded(config.settings.queue.capacity);
        let target = Arc::new(MockTarget::new());
        let store = Arc::new(store);
        let buffer = Arc::new(buffer);
        let applier = Applier::new(
            config,
            Arc::clone(&buffer),
            Arc::new(queue),
            Arc::clone(&target),
            Arc::clone(&store),
        )
        .expect("valid config");
        Self {
            applier,
            sender,
            target,
            store,
            buffer,
        }
    }

    /// Spawn and start the applier.
    pub fn start(&mut self) {
        self.applier.spawn().expect("spawn");
        self.applier.start();
    }

    pub async fn push(&self, descriptor: TransactionDescriptor) {
        self.sender.push(descriptor).await.expect("queue open");
    }

    /// Wait until the store holds `lsa`.
    pub async fn wait_for_progress(&self, lsa: Lsa) {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        while self.store.get(APPLIER_ID) != Some(lsa) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "progress stuck at {:?}, expected {}",
                self.store.get(APPLIER_ID),
                lsa
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait until the applier has restarted at least `n` times.
    pub async fn wait_for_restarts(&self, n: u64) {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        while self.applier.stats().restarts < n {
            assert!(tokio::time::Instant::now() < deadline, "applier did not restart");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait until a condition on the applier counters holds.
    pub async fn wait_for_stats(&self, check: impl Fn(&log_applier::StatsSnapshot) -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        while !check(&self.applier.stats()) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "stats never matched: {:?}",
                self.applier.stats()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn wait_for_state(&self, state: ApplierState) {
        let mut rx = self.applier.state_receiver();
        tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(|s| *s == state))
            .await
            .expect("state not reached")
            .expect("state channel open");
    }

    pub async fn shutdown(mut self) -> Self {
        self.applier.shutdown().await;
        self
    }
}
