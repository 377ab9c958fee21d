//! Self-describing object headers for a single-file hierarchical store.
//!
//! Every stored object owns a header: an ordered, typed sequence of
//! messages (symbol table pointers, data layout, attributes, comments)
//! packed into one or more fixed-capacity chunks. A chunk that fills up is
//! linked to a newly allocated chunk through a continuation record, so a
//! header grows without ever moving its first chunk.
//!
//! # Components
//!
//! - [`codec`] -- per-type body encoding and exact size reporting
//! - [`Chunk`] -- byte layout, slot placement and free space of one chunk
//! - [`HeaderFile`] -- the file handle; header operations are its methods
//!   (`create_header`, `modify`, `read`, `remove`, ...)
//! - [`EntryShadow`] -- caller-owned copy of a symbol table message that
//!   lets a read skip the chunk chain
//!
//! Decoded chunks live in an [`ohdr_cache::MetadataCache`] keyed by address;
//! nothing reaches storage until a flush.
//!
//! # Design Rules
//!
//! 1. Sequence indices of a type are dense from 0 across the whole chain.
//! 2. A chunk never runs out of room for its continuation record.
//! 3. Updates without [`Sequence::New`] never change a message's index.
//! 4. Removing an absent message is a successful no-op.
//! 5. Chunks are released only whole, and the first chunk only by
//!    [`HeaderFile::delete_header`].

pub mod chunk;
pub mod codec;
pub mod config;
pub mod error;
pub mod file;
pub mod header;
pub mod message;
pub mod shadow;

pub use chunk::{Chunk, SlotDecision, SlotRequest, StoredMessage};
pub use config::HeaderConfig;
pub use error::{HeaderError, HeaderResult};
pub use file::HeaderFile;
pub use header::{Modified, Placement, Selection, Sequence};
pub use message::{
    Attribute, Comment, Continuation, DataLayout, Message, MessageBody, MessageFlags, MessageType,
    SymbolTable,
};
pub use ohdr_cache::FlushMode;
pub use shadow::{CachedMessage, EntryShadow};

#[cfg(test)]
mod tests {
    use super::*;
    use ohdr_store::{Backend, MemoryBackend, Storage};
    use ohdr_types::Address;

    fn new_file() -> HeaderFile {
        HeaderFile::in_memory(HeaderConfig::default()).unwrap()
    }

    fn stab(btree: u64, heap: u64) -> Message {
        Message::SymbolTable(SymbolTable::new(btree, heap))
    }

    fn append<B: Backend>(file: &mut HeaderFile<B>, header: Address, msg: &Message) -> usize {
        file.modify(header, None, Sequence::New, MessageFlags::default(), msg)
            .unwrap()
            .index
    }

    fn read_stab<B: Backend>(
        file: &mut HeaderFile<B>,
        header: Address,
        index: usize,
    ) -> SymbolTable {
        file.read_as::<SymbolTable>(header, None, index).unwrap()
    }

    // -----------------------------------------------------------------------
    // Canonical stress scenario
    // -----------------------------------------------------------------------

    #[test]
    fn symbol_table_stress_scenario() {
        let mut file = new_file();
        let header = file.create_header(64).unwrap();

        // Instance 0: create, flush out of the cache, update.
        assert_eq!(append(&mut file, header, &stab(11111111, 22222222)), 0);
        file.flush(FlushMode::WriteAndEvict).unwrap();
        assert!(file.cache().is_empty());

        let m = file
            .modify(
                header,
                None,
                Sequence::Index(0),
                MessageFlags::default(),
                &stab(33333333, 44444444),
            )
            .unwrap();
        assert_eq!(m.index, 0);
        assert_eq!(read_stab(&mut file, header, 0), SymbolTable::new(33333333, 44444444));

        // Instance 1 populates the shadow.
        let mut shadow = EntryShadow::for_header(header);
        let m = file
            .modify(
                header,
                Some(&mut shadow),
                Sequence::New,
                MessageFlags::default(),
                &stab(55555555, 66666666),
            )
            .unwrap();
        assert_eq!(
            m,
            Modified {
                index: 1,
                shadow_updated: true
            }
        );
        assert_eq!(shadow.cached_type(), Some(MessageType::SymbolTable));
        assert_eq!(shadow.symbol_table(), Some(&SymbolTable::new(55555555, 66666666)));

        // Updating instance 1 refreshes the shadow.
        let m = file
            .modify(
                header,
                Some(&mut shadow),
                Sequence::Index(1),
                MessageFlags::default(),
                &stab(77777777, 88888888),
            )
            .unwrap();
        assert_eq!(m.index, 1);
        assert!(m.shadow_updated);
        assert_eq!(shadow.symbol_table(), Some(&SymbolTable::new(77777777, 88888888)));
        assert_eq!(read_stab(&mut file, header, 1), SymbolTable::new(77777777, 88888888));

        // The shadow mirrors instance 1, so instance 0 still comes from the header.
        assert_eq!(
            file.read_as::<SymbolTable>(header, Some(&shadow), 0).unwrap(),
            SymbolTable::new(33333333, 44444444)
        );

        // 40 appends in core, one flush.
        for i in 0..40u64 {
            let index = append(&mut file, header, &stab((i + 1) * 1000 + 1, (i + 1) * 1000 + 2));
            assert_eq!(index, 2 + i as usize);
        }
        file.flush(FlushMode::WriteAndEvict).unwrap();

        // 10 appends, each flushed out of the cache.
        for i in 0..10u64 {
            let index = append(
                &mut file,
                header,
                &stab((i + 1) * 1000 + 10, (i + 1) * 1000 + 20),
            );
            assert_eq!(index, 42 + i as usize);
            file.flush(FlushMode::WriteAndEvict).unwrap();
        }

        assert_eq!(file.message_count(header, MessageType::SymbolTable).unwrap(), 52);
        assert_eq!(file.chunk_addresses(header).unwrap().len(), 7);
        for i in 0..40u64 {
            assert_eq!(
                read_stab(&mut file, header, 2 + i as usize),
                SymbolTable::new((i + 1) * 1000 + 1, (i + 1) * 1000 + 2)
            );
        }
        for i in 0..10u64 {
            assert_eq!(
                read_stab(&mut file, header, 42 + i as usize),
                SymbolTable::new((i + 1) * 1000 + 10, (i + 1) * 1000 + 20)
            );
        }

        // Remove everything.
        let removed = file
            .remove(header, Some(&mut shadow), MessageType::SymbolTable, Selection::All)
            .unwrap();
        assert_eq!(removed, 52);
        assert_eq!(shadow.cached_type(), None);
        for index in 0..52 {
            let err = file
                .read(header, None, MessageType::SymbolTable, index)
                .unwrap_err();
            assert!(matches!(err, HeaderError::NotFound { .. }), "index {index}: {err}");
        }
        assert_eq!(file.chunk_addresses(header).unwrap(), vec![header]);
    }

    // -----------------------------------------------------------------------
    // Round-trip and update
    // -----------------------------------------------------------------------

    #[test]
    fn every_type_round_trips_across_flush() {
        let mut file = new_file();
        let header = file.create_header(256).unwrap();
        let layout = DataLayout {
            address: Address::new(4096),
            dims: vec![10, 20, 30],
        };
        let attr = Attribute::new("units", b"m/s".to_vec());
        let comment = Comment::new("calibrated 2024");
        let table = SymbolTable::new(1024, 2048);

        for msg in [
            Message::from(layout.clone()),
            Message::from(attr.clone()),
            Message::from(comment.clone()),
            Message::from(table),
        ] {
            assert_eq!(append(&mut file, header, &msg), 0);
        }

        for pass in 0..2 {
            assert_eq!(file.read_as::<DataLayout>(header, None, 0).unwrap(), layout, "pass {pass}");
            assert_eq!(file.read_as::<Attribute>(header, None, 0).unwrap(), attr);
            assert_eq!(file.read_as::<Comment>(header, None, 0).unwrap(), comment);
            assert_eq!(file.read_as::<SymbolTable>(header, None, 0).unwrap(), table);
            file.flush(FlushMode::WriteAndEvict).unwrap();
        }
    }

    #[test]
    fn bodies_decode_lazily_after_reload() {
        let mut file = new_file();
        let header = file.create_header(256).unwrap();
        append(&mut file, header, &stab(1, 2));
        append(&mut file, header, &stab(3, 4));
        file.flush(FlushMode::WriteAndEvict).unwrap();

        read_stab(&mut file, header, 0);
        let chunk = file.cache().peek(header).unwrap().content();
        assert!(chunk.messages()[0].is_decoded());
        assert!(!chunk.messages()[1].is_decoded());
    }

    #[test]
    fn in_place_update_keeps_index_and_refreshes_shadow() {
        let mut file = new_file();
        let header = file.create_header(256).unwrap();
        let mut shadow = EntryShadow::for_header(header);
        file.modify(
            header,
            Some(&mut shadow),
            Sequence::New,
            MessageFlags::default(),
            &stab(1, 1),
        )
        .unwrap();
        append(&mut file, header, &stab(2, 2));

        let m = file
            .modify(
                header,
                Some(&mut shadow),
                Sequence::Index(0),
                MessageFlags::default(),
                &stab(9, 9),
            )
            .unwrap();
        assert_eq!(m.index, 0);
        assert!(m.shadow_updated);
        assert_eq!(shadow.symbol_table(), Some(&SymbolTable::new(9, 9)));
        assert_eq!(read_stab(&mut file, header, 1), SymbolTable::new(2, 2));
        assert_eq!(file.chunk_addresses(header).unwrap().len(), 1);
    }

    #[test]
    fn shadow_read_skips_the_cache() {
        let mut file = new_file();
        let header = file.create_header(256).unwrap();
        let mut shadow = EntryShadow::for_header(header);
        file.modify(
            header,
            Some(&mut shadow),
            Sequence::New,
            MessageFlags::default(),
            &stab(5, 6),
        )
        .unwrap();

        let before = file.cache().stats();
        let msg = file
            .read(header, Some(&shadow), MessageType::SymbolTable, 0)
            .unwrap();
        assert_eq!(msg, stab(5, 6));
        assert_eq!(file.cache().stats(), before);

        // A shadow for another header is ignored.
        let other = file.create_header(64).unwrap();
        let err = file
            .read(other, Some(&shadow), MessageType::SymbolTable, 0)
            .unwrap_err();
        assert!(matches!(err, HeaderError::NotFound { index: 0, .. }));
    }

    #[test]
    fn growing_update_splits_the_chunk() {
        let mut file = new_file();
        let header = file.create_header(64).unwrap();
        append(&mut file, header, &Message::Comment(Comment::new("x")));
        append(&mut file, header, &stab(7, 8));

        let long = Comment::new("y".repeat(40));
        let m = file
            .modify(
                header,
                None,
                Sequence::Index(0),
                MessageFlags::default(),
                &Message::from(long.clone()),
            )
            .unwrap();
        assert_eq!(m.index, 0);
        assert_eq!(file.chunk_addresses(header).unwrap().len(), 2);

        file.flush(FlushMode::WriteAndEvict).unwrap();
        assert_eq!(file.read_as::<Comment>(header, None, 0).unwrap(), long);
        assert_eq!(read_stab(&mut file, header, 0), SymbolTable::new(7, 8));
    }

    #[test]
    fn shrinking_update_stays_in_slot() {
        let mut file = new_file();
        let header = file.create_header(256).unwrap();
        append(&mut file, header, &Message::Comment(Comment::new("a long first comment")));
        let used = file.cache().peek(header).unwrap().content().used_bytes();

        file.modify(
            header,
            None,
            Sequence::Index(0),
            MessageFlags::default(),
            &Message::Comment(Comment::new("tiny")),
        )
        .unwrap();
        assert_eq!(file.cache().peek(header).unwrap().content().used_bytes(), used);
        file.flush(FlushMode::WriteAndEvict).unwrap();
        assert_eq!(file.read_as::<Comment>(header, None, 0).unwrap().text, "tiny");
    }

    // -----------------------------------------------------------------------
    // Overflow
    // -----------------------------------------------------------------------

    #[test]
    fn overflow_is_transparent_with_a_bounded_cache() {
        let config = HeaderConfig {
            cache_capacity: Some(2),
            ..Default::default()
        };
        let mut file = HeaderFile::in_memory(config).unwrap();
        let header = file.create_header(64).unwrap();

        for i in 0..30u8 {
            let attr = Attribute::new(format!("attr-{i}"), vec![i; 20]);
            assert_eq!(append(&mut file, header, &Message::from(attr)), i as usize);
            if i % 5 == 4 {
                file.flush(FlushMode::WriteOnly).unwrap();
            }
        }
        file.flush(FlushMode::WriteAndEvict).unwrap();
        assert!(file.chunk_addresses(header).unwrap().len() > 2);
        assert!(file.cache().len() <= 2);

        for i in 0..30u8 {
            let attr = file.read_as::<Attribute>(header, None, i as usize).unwrap();
            assert_eq!(attr.name, format!("attr-{i}"));
            assert_eq!(attr.data, vec![i; 20]);
        }
    }

    #[test]
    fn allocation_failure_leaves_header_intact() {
        let config = HeaderConfig {
            max_file_size: Some(128),
            ..Default::default()
        };
        let mut file = HeaderFile::in_memory(config).unwrap();
        let header = file.create_header(64).unwrap();
        append(&mut file, header, &stab(1, 2));

        let err = file
            .modify(header, None, Sequence::New, MessageFlags::default(), &stab(3, 4))
            .unwrap_err();
        assert!(matches!(err, HeaderError::AllocationFailure(_)), "{err}");
        assert_eq!(file.chunk_addresses(header).unwrap(), vec![header]);
        assert_eq!(file.message_count(header, MessageType::SymbolTable).unwrap(), 1);
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    #[test]
    fn remove_all_is_idempotent() {
        let mut file = new_file();
        let header = file.create_header(256).unwrap();
        for i in 0..3 {
            append(&mut file, header, &stab(i, i));
        }
        let all = Selection::All;
        assert_eq!(file.remove(header, None, MessageType::SymbolTable, all).unwrap(), 3);
        assert_eq!(file.remove(header, None, MessageType::SymbolTable, all).unwrap(), 0);
        assert_eq!(file.remove(header, None, MessageType::Comment, all).unwrap(), 0);
        assert_eq!(
            file.remove(header, None, MessageType::Attribute, Selection::Index(4))
                .unwrap(),
            0
        );
        assert!(matches!(
            file.read(header, None, MessageType::SymbolTable, 0),
            Err(HeaderError::NotFound { .. })
        ));
    }

    #[test]
    fn deleted_slot_is_reused_before_appending() {
        let mut file = new_file();
        let header = file.create_header(256).unwrap();
        for i in 0..3 {
            append(&mut file, header, &stab(i, i));
        }
        append(&mut file, header, &Message::Comment(Comment::new("after")));
        let removed = file
            .remove(header, None, MessageType::SymbolTable, Selection::Index(2))
            .unwrap();
        assert_eq!(removed, 1);
        let used = file.cache().peek(header).unwrap().content().used_bytes();

        assert_eq!(append(&mut file, header, &stab(9, 9)), 2);
        assert_eq!(file.cache().peek(header).unwrap().content().used_bytes(), used);
        assert_eq!(file.cache().peek(header).unwrap().content().messages().len(), 4);
        assert_eq!(read_stab(&mut file, header, 1), SymbolTable::new(1, 1));
        assert_eq!(read_stab(&mut file, header, 2), SymbolTable::new(9, 9));
    }

    #[test]
    fn new_instance_after_removal_keeps_creation_order() {
        let mut file = new_file();
        let header = file.create_header(256).unwrap();
        for i in 0..3 {
            append(&mut file, header, &stab(i, i));
        }
        for _ in 0..2 {
            file.remove(header, None, MessageType::SymbolTable, Selection::Index(0))
                .unwrap();
        }
        let mut shadow = EntryShadow::for_header(header);
        let m = file
            .modify(
                header,
                Some(&mut shadow),
                Sequence::New,
                MessageFlags::default(),
                &stab(9, 9),
            )
            .unwrap();
        assert_eq!(m.index, 1);
        assert_eq!(read_stab(&mut file, header, 0), SymbolTable::new(2, 2));
        assert_eq!(read_stab(&mut file, header, 1), SymbolTable::new(9, 9));

        // The shadow mirrors instance 1, so instance 0 is read from the header.
        assert_eq!(
            file.read_as::<SymbolTable>(header, Some(&shadow), 0).unwrap(),
            SymbolTable::new(2, 2)
        );
    }

    #[test]
    fn reuse_skips_chunks_before_the_last_live_instance() {
        let mut file = new_file();
        let header = file.create_header(64).unwrap();
        for i in 0..12 {
            append(&mut file, header, &stab(i, i));
        }
        let chain = file.chunk_addresses(header).unwrap();
        assert_eq!(chain.len(), 3);

        // Free a slot in the middle chunk while later chunks stay live.
        file.remove(header, None, MessageType::SymbolTable, Selection::Index(1))
            .unwrap();
        let middle = file.cache().peek(chain[1]).unwrap().content().messages().len();

        assert_eq!(append(&mut file, header, &stab(99, 99)), 11);
        assert_eq!(
            file.cache().peek(chain[1]).unwrap().content().messages().len(),
            middle
        );
        assert_eq!(read_stab(&mut file, header, 11), SymbolTable::new(99, 99));
        assert_eq!(read_stab(&mut file, header, 10), SymbolTable::new(11, 11));
    }

    #[test]
    fn emptied_middle_chunk_is_released() {
        let mut file = new_file();
        let header = file.create_header(64).unwrap();
        for i in 0..12 {
            append(&mut file, header, &stab(i, i));
        }
        let chain = file.chunk_addresses(header).unwrap();
        assert_eq!(chain.len(), 3);

        for _ in 0..10 {
            file.remove(header, None, MessageType::SymbolTable, Selection::Index(1))
                .unwrap();
        }
        assert_eq!(file.chunk_addresses(header).unwrap(), vec![chain[0], chain[2]]);
        assert!(!file.cache().contains(chain[1]));
        assert_eq!(read_stab(&mut file, header, 1), SymbolTable::new(11, 11));

        file.flush(FlushMode::WriteAndEvict).unwrap();
        assert_eq!(file.message_count(header, MessageType::SymbolTable).unwrap(), 2);
    }

    #[test]
    fn remove_clears_matching_shadow() {
        let mut file = new_file();
        let header = file.create_header(256).unwrap();
        let mut shadow = EntryShadow::for_header(header);
        file.modify(
            header,
            Some(&mut shadow),
            Sequence::New,
            MessageFlags::default(),
            &stab(1, 2),
        )
        .unwrap();
        append(&mut file, header, &Message::Comment(Comment::new("c")));

        file.remove(header, Some(&mut shadow), MessageType::Comment, Selection::All)
            .unwrap();
        assert_eq!(shadow.cached_type(), Some(MessageType::SymbolTable));

        file.remove(header, Some(&mut shadow), MessageType::SymbolTable, Selection::Index(0))
            .unwrap();
        assert_eq!(shadow.cached_type(), None);
    }

    #[test]
    fn delete_header_releases_every_chunk() {
        let mut file = new_file();
        let header = file.create_header(64).unwrap();
        for i in 0..15 {
            append(&mut file, header, &stab(i, i));
        }
        let chain = file.chunk_addresses(header).unwrap();
        file.delete_header(header).unwrap();

        for address in chain {
            assert!(!file.cache().contains(address));
        }
        assert_eq!(file.backend().allocator().end(), 0);
        assert_eq!(file.backend().allocator().free_regions(), 0);
    }

    // -----------------------------------------------------------------------
    // Error paths
    // -----------------------------------------------------------------------

    #[test]
    fn single_instance_types_refuse_duplicates() {
        let mut file = new_file();
        let header = file.create_header(256).unwrap();
        append(&mut file, header, &Message::Comment(Comment::new("one")));
        let err = file
            .modify(
                header,
                None,
                Sequence::New,
                MessageFlags::default(),
                &Message::Comment(Comment::new("two")),
            )
            .unwrap_err();
        assert!(matches!(err, HeaderError::DuplicateMessage(MessageType::Comment)));

        let layout = Message::DataLayout(DataLayout {
            address: Address::new(0),
            dims: vec![1],
        });
        append(&mut file, header, &layout);
        let err = file
            .modify(header, None, Sequence::New, MessageFlags::default(), &layout)
            .unwrap_err();
        assert!(matches!(err, HeaderError::DuplicateMessage(MessageType::DataLayout)));
    }

    #[test]
    fn update_requires_an_existing_message() {
        let mut file = new_file();
        let header = file.create_header(256).unwrap();
        let err = file
            .modify(header, None, Sequence::Index(0), MessageFlags::default(), &stab(1, 1))
            .unwrap_err();
        assert!(matches!(err, HeaderError::NoExistingMessage(MessageType::SymbolTable)));

        append(&mut file, header, &stab(1, 1));
        let err = file
            .modify(header, None, Sequence::Index(5), MessageFlags::default(), &stab(1, 1))
            .unwrap_err();
        assert!(matches!(err, HeaderError::NotFound { index: 5, .. }));
    }

    #[test]
    fn constant_messages_cannot_be_updated() {
        let mut file = new_file();
        let header = file.create_header(256).unwrap();
        file.modify(header, None, Sequence::New, MessageFlags::constant(), &stab(1, 1))
            .unwrap();
        let err = file
            .modify(header, None, Sequence::Index(0), MessageFlags::default(), &stab(2, 2))
            .unwrap_err();
        assert!(matches!(
            err,
            HeaderError::ConstantMessage {
                kind: MessageType::SymbolTable,
                index: 0
            }
        ));
        assert_eq!(read_stab(&mut file, header, 0), SymbolTable::new(1, 1));
    }

    #[test]
    fn oversized_message_is_rejected() {
        let config = HeaderConfig {
            max_message_size: 64,
            ..Default::default()
        };
        let mut file = HeaderFile::in_memory(config).unwrap();
        let header = file.create_header(256).unwrap();
        let attr = Message::from(Attribute::new("big", vec![0u8; 100]));
        let err = file
            .modify(header, None, Sequence::New, MessageFlags::default(), &attr)
            .unwrap_err();
        assert!(matches!(err, HeaderError::MessageTooLarge { limit: 64, .. }));
    }

    #[test]
    fn message_ceiling_cannot_be_configured_near_u32_max() {
        let config = HeaderConfig {
            max_message_size: u32::MAX - 8,
            ..Default::default()
        };
        assert!(matches!(
            HeaderFile::in_memory(config),
            Err(HeaderError::Config(_))
        ));
    }

    #[test]
    fn unknown_tag_on_disk_is_reported() {
        let mut file = new_file();
        let header = file.create_header(64).unwrap();
        append(&mut file, header, &stab(1, 2));
        file.flush(FlushMode::WriteAndEvict).unwrap();

        let tag_at = Address::new(header.get() + 8);
        file.backend_mut()
            .write_at(tag_at, &0x7777u16.to_le_bytes())
            .unwrap();
        let err = file
            .read(header, None, MessageType::SymbolTable, 0)
            .unwrap_err();
        assert!(matches!(err, HeaderError::UnknownMessageType(0x7777)));
    }

    #[test]
    fn corrupt_header_does_not_affect_others() {
        let mut file = new_file();
        let bad = file.create_header(64).unwrap();
        let good = file.create_header(64).unwrap();
        append(&mut file, bad, &stab(1, 2));
        append(&mut file, good, &stab(3, 4));
        file.flush(FlushMode::WriteAndEvict).unwrap();

        file.backend_mut().write_at(bad, b"JUNK").unwrap();
        let err = file.read(bad, None, MessageType::SymbolTable, 0).unwrap_err();
        assert!(matches!(err, HeaderError::Corrupt { .. }));
        assert_eq!(read_stab(&mut file, good, 0), SymbolTable::new(3, 4));
    }

    #[test]
    fn corrupt_capacity_prefix_is_reported() {
        let mut file = new_file();
        let header = file.create_header(64).unwrap();
        append(&mut file, header, &stab(1, 2));
        file.flush(FlushMode::WriteAndEvict).unwrap();

        let mut prefix = b"OHCK".to_vec();
        prefix.extend_from_slice(&u32::MAX.to_le_bytes());
        file.backend_mut().write_at(header, &prefix).unwrap();
        let err = file.read(header, None, MessageType::SymbolTable, 0).unwrap_err();
        assert!(matches!(err, HeaderError::Corrupt { .. }), "{err}");

        // A capacity that fits in memory but runs past the file end.
        prefix[4..].copy_from_slice(&1_000_000u32.to_le_bytes());
        file.backend_mut().write_at(header, &prefix).unwrap();
        let err = file.read(header, None, MessageType::SymbolTable, 0).unwrap_err();
        assert!(matches!(err, HeaderError::Corrupt { .. }), "{err}");
        assert!(file.cache().is_empty());
    }

    #[test]
    fn internal_types_are_never_found() {
        let mut file = new_file();
        let header = file.create_header(64).unwrap();
        for i in 0..3 {
            append(&mut file, header, &stab(i, i));
        }
        let err = file
            .read(header, None, MessageType::Continuation, 0)
            .unwrap_err();
        assert!(matches!(err, HeaderError::NotFound { .. }));
    }

    #[test]
    fn operations_on_unwritten_address_fail() {
        let mut file = new_file();
        let err = file
            .modify(Address::UNDEF, None, Sequence::New, MessageFlags::default(), &stab(1, 1))
            .unwrap_err();
        assert!(matches!(err, HeaderError::Io(_)));
        let err = file
            .read(Address::new(4096), None, MessageType::SymbolTable, 0)
            .unwrap_err();
        assert!(matches!(err, HeaderError::Io(_)));
    }

    // -----------------------------------------------------------------------
    // File handle
    // -----------------------------------------------------------------------

    #[test]
    fn pinned_header_survives_evicting_flush() {
        let mut file = new_file();
        let header = file.create_header(64).unwrap();
        file.pin_header(header).unwrap();
        file.flush(FlushMode::WriteAndEvict).unwrap();
        assert!(file.cache().contains(header));

        file.unpin_header(header).unwrap();
        file.flush(FlushMode::WriteAndEvict).unwrap();
        assert!(!file.cache().contains(header));
    }

    #[test]
    fn flush_header_writes_only_its_chunks() {
        let mut file = new_file();
        let first = file.create_header(64).unwrap();
        let second = file.create_header(64).unwrap();
        for i in 0..3 {
            append(&mut file, first, &stab(i, i));
        }
        append(&mut file, second, &stab(9, 9));

        file.flush_header(first, FlushMode::WriteOnly).unwrap();
        for address in file.chunk_addresses(first).unwrap() {
            assert_eq!(file.cache().is_dirty(address), Some(false));
        }
        assert_eq!(file.cache().is_dirty(second), Some(true));
    }

    #[test]
    fn close_returns_flushed_backend() {
        let mut file = new_file();
        let header = file.create_header(64).unwrap();
        append(&mut file, header, &stab(1, 2));
        let backend: MemoryBackend = file.close().unwrap();
        assert_eq!(&backend.as_bytes()[..4], b"OHCK");
    }

    #[test]
    fn file_backed_store_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.ohdr");

        let header = {
            let mut file = HeaderFile::create(&path, HeaderConfig::default()).unwrap();
            let header = file.create_header(64).unwrap();
            append(&mut file, header, &Message::Comment(Comment::new("on disk")));
            for i in 0..5 {
                append(&mut file, header, &stab(i, i * 10));
            }
            file.close().unwrap();
            header
        };

        let mut file = HeaderFile::open(&path, HeaderConfig::default()).unwrap();
        assert_eq!(
            file.read_as::<Comment>(header, None, 0).unwrap().text,
            "on disk"
        );
        for i in 0..5 {
            assert_eq!(read_stab(&mut file, header, i as usize), SymbolTable::new(i, i * 10));
        }

        // New chunks land past the existing data.
        let other = file.create_header(64).unwrap();
        assert!(!file.chunk_addresses(header).unwrap().contains(&other));
        append(&mut file, other, &stab(7, 7));
        file.flush(FlushMode::WriteAndEvict).unwrap();
        assert_eq!(read_stab(&mut file, header, 4), SymbolTable::new(4, 40));
    }
}
