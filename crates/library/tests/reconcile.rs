mod support;

use std::fs;

use common::{AlbumKind, ArtistRole};
use library::{CancelToken, RunError, RunMode, RunStatus, SkipReason};
use support::Harness;

fn track(artist: &str, album: &str, title: &str) -> Vec<(&'static str, String)> {
    vec![
        ("artist", artist.to_string()),
        ("album", album.to_string()),
        ("title", title.to_string()),
    ]
}

fn write(h: &Harness, relpath: &str, fields: Vec<(&'static str, String)>) {
    let borrowed: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
    h.write_track(relpath, &borrowed);
}

#[test]
fn first_run_creates_artists_albums_and_tracks() {
    let h = Harness::new();
    write(&h, "X/Z/01.mp3", track("X", "Z", "One"));
    write(&h, "X/Z/02.mp3", track("X", "Z", "Two"));
    write(&h, "Y/W/01.ogg", track("Y", "W", "Three"));

    let report = h.run(RunMode::Add);
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.created, 3);

    let stats = h.catalog().stats().expect("stats");
    assert_eq!(stats.tracks, 3);
    assert_eq!(stats.albums, 2);
    assert_eq!(stats.artists, 3);

    let album = h.album_of("X/Z/01.mp3");
    assert_eq!(album.title, "Z");
    assert_eq!(album.kind, AlbumKind::Regular);
    let tracks = h.catalog().album_tracks(&album.id).expect("tracks");
    assert_eq!(tracks.len(), 2);
}

#[test]
fn second_run_without_changes_mutates_nothing() {
    let h = Harness::new();
    write(&h, "X/Z/01.mp3", track("X", "Z", "One"));
    write(&h, "D/01.mp3", track("P", "Comp", "A"));
    write(&h, "D/02.mp3", track("Q", "Comp", "B"));
    write(&h, "loose.mp3", vec![("artist", "X".into()), ("title", "Loose".into())]);
    h.run(RunMode::Add);

    let again = h.run(RunMode::Add);
    assert_eq!(again.mutations(), 0);
    assert_eq!(again.unchanged, 4);

    let full = h.run(RunMode::Full);
    assert_eq!(full.mutations(), 0);
    assert_eq!(full.unchanged, 4);
    assert_eq!(full.status, RunStatus::Success);
}

#[test]
fn moving_a_file_keeps_its_addition_time() {
    let h = Harness::new();
    h.set_clock(100);
    write(&h, "X/Z/01.mp3", track("X", "Z", "One"));
    h.run(RunMode::Add);
    let before = h.track_at("X/Z/01.mp3").expect("track");

    h.set_clock(200);
    h.rename("X/Z/01.mp3", "X/Renamed/first.mp3");
    let report = h.run(RunMode::Add);

    assert_eq!(report.relocated, 1);
    assert_eq!(report.created, 0);
    assert_eq!(report.deleted, 0);
    assert!(h.track_at("X/Z/01.mp3").is_none());
    let after = h.track_at("X/Renamed/first.mp3").expect("moved track");
    assert_eq!(after.id, before.id);
    assert_eq!(after.checksum, before.checksum);
    assert_eq!(after.added, 100);
    assert_eq!(h.catalog().stats().expect("stats").tracks, 1);
}

#[test]
fn editing_tags_keeps_its_addition_time() {
    let h = Harness::new();
    h.set_clock(100);
    write(&h, "X/Z/01.mp3", track("X", "Z", "One"));
    h.run(RunMode::Add);
    let before = h.track_at("X/Z/01.mp3").expect("track");

    h.set_clock(200);
    write(&h, "X/Z/01.mp3", track("X", "Z", "One (Remastered)"));
    let report = h.run(RunMode::Add);

    assert_eq!(report.updated, 1);
    let after = h.track_at("X/Z/01.mp3").expect("track");
    assert_eq!(after.id, before.id);
    assert_ne!(after.checksum, before.checksum);
    assert_eq!(after.title, "One (Remastered)");
    assert_eq!(after.added, 100);
}

#[test]
fn moving_and_editing_together_is_a_new_track() {
    let h = Harness::new();
    h.set_clock(100);
    write(&h, "X/Z/01.mp3", track("X", "Z", "One"));
    h.run(RunMode::Add);
    let before = h.track_at("X/Z/01.mp3").expect("track");

    h.set_clock(200);
    h.remove("X/Z/01.mp3");
    write(&h, "X/Z2/01.mp3", track("X", "Z", "One, edited"));
    let report = h.run(RunMode::Add);

    assert_eq!(report.created, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.relocated, 0);
    assert!(h.catalog().get_track(&before.id).expect("get").is_none());
    let after = h.track_at("X/Z2/01.mp3").expect("new track");
    assert_ne!(after.id, before.id);
    assert_eq!(after.added, 200);
}

#[test]
fn deleted_files_take_orphaned_rows_with_them() {
    let h = Harness::new();
    write(&h, "X/Z/01.mp3", track("X", "Z", "One"));
    write(&h, "Y/W/01.mp3", track("Y", "W", "Two"));
    h.run(RunMode::Add);
    let gone = h.track_at("Y/W/01.mp3").expect("track");

    h.remove("Y/W/01.mp3");
    let report = h.run(RunMode::Add);

    assert_eq!(report.deleted, 1);
    assert!(h.catalog().get_track(&gone.id).expect("get").is_none());
    assert!(h.catalog().get_album(&gone.album_id).expect("get").is_none());
    assert!(h.catalog().get_artist(&gone.artist_id).expect("get").is_none());
    let stats = h.catalog().stats().expect("stats");
    assert_eq!(stats.tracks, 1);
    assert_eq!(stats.albums, 1);
    // X plus the reserved Various artist.
    assert_eq!(stats.artists, 2);
}

#[test]
fn the_various_artist_survives_an_empty_library() {
    let h = Harness::new();
    write(&h, "X/Z/01.mp3", track("X", "Z", "One"));
    h.run(RunMode::Add);
    h.remove("X/Z/01.mp3");
    h.run(RunMode::Full);

    let (artists, total) = h.catalog().list_artists(None, 10, 0).expect("list");
    assert_eq!(total, 1);
    assert!(artists[0].various);
    assert_eq!(artists[0].name, "Various");
}

#[test]
fn differing_artists_in_one_directory_collate_into_various() {
    let h = Harness::new();
    write(&h, "D/01.mp3", track("X", "Z", "A1"));
    write(&h, "D/02.mp3", track("Y", "Z", "A2"));
    h.run(RunMode::Add);

    let first = h.album_of("D/01.mp3");
    let second = h.album_of("D/02.mp3");
    assert_eq!(first.id, second.id);
    assert_eq!(first.kind, AlbumKind::Various);
    assert_eq!(first.title, "Z");
    let various = h.catalog().get_artist(&first.artist_id).expect("get").expect("artist");
    assert!(various.various);

    let a1 = h.track_at("D/01.mp3").expect("track");
    let a2 = h.track_at("D/02.mp3").expect("track");
    assert_ne!(a1.artist_id, a2.artist_id);
    let x = h.catalog().get_artist(&a1.artist_id).expect("get").expect("artist");
    assert_eq!(x.name, "X");
    assert_eq!(h.catalog().stats().expect("stats").albums, 1);
}

#[test]
fn same_title_in_different_directories_stays_separate() {
    let h = Harness::new();
    write(&h, "D1/01.mp3", track("X", "Hits", "a"));
    write(&h, "D1/02.mp3", track("Y", "Hits", "b"));
    write(&h, "D2/01.mp3", track("P", "Hits", "c"));
    write(&h, "D2/02.mp3", track("Q", "Hits", "d"));
    h.run(RunMode::Add);

    let one = h.album_of("D1/01.mp3");
    let two = h.album_of("D2/02.mp3");
    assert_eq!(one.kind, AlbumKind::Various);
    assert_eq!(two.kind, AlbumKind::Various);
    assert_ne!(one.id, two.id);
    assert_eq!(h.album_of("D1/02.mp3").id, one.id);
    assert_eq!(h.album_of("D2/01.mp3").id, two.id);
}

#[test]
fn various_album_reverts_when_one_artist_remains() {
    let h = Harness::new();
    write(&h, "D/01.mp3", track("X", "Z", "A1"));
    write(&h, "D/02.mp3", track("Y", "Z", "A2"));
    write(&h, "D/03.mp3", track("X", "Z", "A3"));
    h.run(RunMode::Add);
    let various_id = h.album_of("D/01.mp3").id;

    h.remove("D/02.mp3");
    let report = h.run(RunMode::Add);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.recollated, 2);

    let album = h.album_of("D/01.mp3");
    assert_eq!(album.kind, AlbumKind::Regular);
    assert_eq!(album.id, h.album_of("D/03.mp3").id);
    assert!(h.catalog().get_album(&various_id).expect("get").is_none());
}

#[test]
fn one_artist_album_may_span_disc_directories() {
    let h = Harness::new();
    let mut disc1 = track("X", "Box Set", "a");
    disc1.push(("disc", "1".into()));
    let mut disc2 = track("X", "Box Set", "b");
    disc2.push(("disc", "2".into()));
    write(&h, "X/Box/CD1/01.mp3", disc1);
    write(&h, "X/Box/CD2/01.mp3", disc2);
    h.run(RunMode::Add);

    let album = h.album_of("X/Box/CD1/01.mp3");
    assert_eq!(album.id, h.album_of("X/Box/CD2/01.mp3").id);
    let tracks = h.catalog().album_tracks(&album.id).expect("tracks");
    assert_eq!(tracks[0].disc_no, Some(1));
    assert_eq!(tracks[1].disc_no, Some(2));
}

#[test]
fn tracks_without_album_share_one_bucket_per_artist() {
    let h = Harness::new();
    write(&h, "a/1.mp3", vec![("artist", "The Band".into()), ("title", "x".into())]);
    write(&h, "b/2.mp3", vec![("artist", "Band".into()), ("title", "y".into())]);
    write(&h, "b/3.mp3", vec![("artist", "Other".into()), ("title", "z".into())]);
    h.run(RunMode::Add);

    let first = h.album_of("a/1.mp3");
    assert_eq!(first.kind, AlbumKind::NonAlbum);
    assert_eq!(first.title, "Non-Album Tracks: The Band");
    assert_eq!(first.id, h.album_of("b/2.mp3").id);
    let other = h.album_of("b/3.mp3");
    assert_eq!(other.kind, AlbumKind::NonAlbum);
    assert_ne!(other.id, first.id);
}

#[test]
fn leading_the_is_kept_as_a_prefix() {
    let h = Harness::new();
    write(&h, "a/1.mp3", track("Band", "First", "x"));
    write(&h, "b/1.mp3", track("The  Band", "Second", "y"));
    h.run(RunMode::Add);

    let one = h.track_at("a/1.mp3").expect("track");
    let two = h.track_at("b/1.mp3").expect("track");
    assert_eq!(one.artist_id, two.artist_id);
    let artist = h.catalog().get_artist(&one.artist_id).expect("get").expect("artist");
    assert_eq!(artist.name, "Band");
    assert_eq!(artist.prefix.as_deref(), Some("The"));
}

#[test]
fn names_differing_only_in_accents_merge() {
    let h = Harness::new();
    write(&h, "a/1.mp3", track("Umläut", "Mediæval", "x"));
    write(&h, "b/1.mp3", track("Umlaut", "Mediaeval", "y"));
    write(&h, "c/1.mp3", track("søster", "Album", "z"));
    write(&h, "d/1.mp3", track("soster", "Album", "w"));
    h.run(RunMode::Add);

    assert_eq!(h.album_of("a/1.mp3").id, h.album_of("b/1.mp3").id);
    assert_eq!(h.album_of("c/1.mp3").id, h.album_of("d/1.mp3").id);
    assert_eq!(h.catalog().stats().expect("stats").artists, 3);
}

#[test]
fn missing_artist_is_skipped_with_reason() {
    let h = Harness::new();
    write(&h, "a/1.mp3", vec![("artist", "  ".into()), ("album", "Z".into()), ("title", "t".into())]);
    write(&h, "a/2.mp3", vec![("artist", "X".into()), ("album", "Z".into())]);
    let report = h.run(RunMode::Add);

    assert_eq!(report.status, RunStatus::PartialSuccess);
    assert_eq!(report.created, 0);
    let reasons: Vec<SkipReason> = report.skipped.iter().map(|s| s.reason).collect();
    assert_eq!(reasons, vec![SkipReason::MissingArtist, SkipReason::MissingTitle]);
    assert_eq!(report.skipped[0].relpath, "a/1.mp3");
    assert_eq!(h.catalog().stats().expect("stats").tracks, 0);
}

#[test]
fn reserved_various_artist_is_rejected() {
    let h = Harness::new();
    write(&h, "a/1.mp3", track("Various", "Z", "t"));
    write(&h, "a/2.mp3", track("various", "Z", "u"));
    let report = h.run(RunMode::Add);

    assert_eq!(report.skipped.len(), 2);
    assert!(report
        .skipped
        .iter()
        .all(|s| s.reason == SkipReason::ReservedArtist));
    assert_eq!(report.skipped[0].detail, "Artist name \"Various\" is reserved");
    assert_eq!(h.catalog().stats().expect("stats").tracks, 0);
}

#[test]
fn tags_that_stop_qualifying_remove_the_row() {
    let h = Harness::new();
    write(&h, "a/1.mp3", track("X", "Z", "t"));
    h.run(RunMode::Add);

    write(&h, "a/1.mp3", vec![("album", "Z".into()), ("title", "t".into())]);
    let report = h.run(RunMode::Add);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.deleted, 1);
    assert!(h.track_at("a/1.mp3").is_none());
}

#[test]
fn unreadable_file_keeps_its_existing_row() {
    let h = Harness::new();
    write(&h, "a/1.mp3", track("X", "Z", "t"));
    h.run(RunMode::Add);
    let before = h.track_at("a/1.mp3").expect("track");

    h.write_raw("a/1.mp3", b"unreadable\n");
    let report = h.run(RunMode::Add);
    assert_eq!(report.status, RunStatus::PartialSuccess);
    assert_eq!(report.skipped[0].reason, SkipReason::Unreadable);
    assert_eq!(report.deleted, 0);
    assert_eq!(h.track_at("a/1.mp3").expect("kept").id, before.id);
}

#[test]
fn byte_identical_copy_next_to_original_is_created() {
    let h = Harness::new();
    h.set_clock(100);
    write(&h, "a/1.mp3", track("X", "Z", "t"));
    h.run(RunMode::Add);

    h.set_clock(200);
    fs::copy(h.path("a/1.mp3"), h.path("a/copy.mp3")).expect("copy");
    let report = h.run(RunMode::Add);

    assert_eq!(report.created, 1);
    assert_eq!(report.relocated, 0);
    assert_eq!(h.track_at("a/1.mp3").expect("original").added, 100);
    assert_eq!(h.track_at("a/copy.mp3").expect("copy").added, 200);
    let checksum = h.track_at("a/1.mp3").expect("original").checksum;
    assert_eq!(h.catalog().find_track_by_checksum(&checksum).expect("find").len(), 2);
}

#[test]
fn two_moved_copies_claim_two_rows() {
    let h = Harness::new();
    write(&h, "a/1.mp3", track("X", "Z", "t"));
    fs::copy(h.path("a/1.mp3"), h.path("a/2.mp3")).expect("copy");
    h.run(RunMode::Add);

    h.rename("a/1.mp3", "b/1.mp3");
    h.rename("a/2.mp3", "b/2.mp3");
    let report = h.run(RunMode::Add);
    assert_eq!(report.relocated, 2);
    assert_eq!(report.created, 0);
    assert_eq!(report.deleted, 0);
    assert_eq!(h.catalog().stats().expect("stats").tracks, 2);
}

#[test]
fn incremental_trusts_size_and_mtime_but_full_does_not() {
    let h = Harness::new();
    write(&h, "a/1.mp3", track("X", "Z", "abc"));
    h.run(RunMode::Add);
    let mtime = h.mtime_of("a/1.mp3");

    write(&h, "a/1.mp3", track("X", "Z", "xyz"));
    h.set_mtime("a/1.mp3", mtime);

    let quick = h.run(RunMode::Add);
    assert_eq!(quick.updated, 0);
    assert_eq!(quick.unchanged, 1);
    assert_eq!(h.track_at("a/1.mp3").expect("track").title, "abc");

    let full = h.run(RunMode::Full);
    assert_eq!(full.updated, 1);
    assert_eq!(h.track_at("a/1.mp3").expect("track").title, "xyz");
}

#[test]
fn new_mtime_with_same_content_only_touches_the_row() {
    let h = Harness::new();
    write(&h, "a/1.mp3", track("X", "Z", "t"));
    h.run(RunMode::Add);
    h.set_mtime("a/1.mp3", 1_900_000_000);

    let report = h.run(RunMode::Add);
    assert_eq!(report.touched, 1);
    assert_eq!(report.updated, 0);
    assert_eq!(h.track_at("a/1.mp3").expect("track").file_mtime, 1_900_000_000);
    assert_eq!(h.run(RunMode::Add).mutations(), 0);
}

#[test]
fn dated_live_titles_flag_the_album() {
    let h = Harness::new();
    write(&h, "a/1.mp3", track("X", "2016-09-20 - Live at Somewhere", "t"));
    write(&h, "b/1.mp3", track("X", "Live and Let Die", "u"));
    h.run(RunMode::Add);

    assert!(h.album_of("a/1.mp3").live);
    assert!(!h.album_of("b/1.mp3").live);

    write(&h, "a/1.mp3", track("X", "Somewhere", "t"));
    h.run(RunMode::Add);
    assert!(!h.album_of("a/1.mp3").live);
}

#[test]
fn classical_roles_become_credits() {
    let h = Harness::new();
    let mut fields = track("Orchestra", "Symphony No. 5", "Allegro");
    fields.push(("ensemble", "Berlin Phil".into()));
    fields.push(("conductor", "Conductor".into()));
    fields.push(("composer", "Composer".into()));
    write(&h, "a/1.mp3", fields);
    h.run(RunMode::Add);

    let track = h.track_at("a/1.mp3").expect("track");
    let conductor_id = track.credit(ArtistRole::Conductor).expect("conductor");
    let conductor = h.catalog().get_artist(conductor_id).expect("get").expect("artist");
    assert_eq!(conductor.name, "Conductor");
    let album = h.album_of("a/1.mp3");
    assert!(album.roles.ensemble && album.roles.conductor && album.roles.composer);

    // Dropping the track removes the credited artists too.
    h.remove("a/1.mp3");
    h.run(RunMode::Add);
    assert_eq!(h.catalog().stats().expect("stats").artists, 1);
}

#[test]
fn album_takes_earliest_addition_time() {
    let h = Harness::new();
    h.set_clock(300);
    write(&h, "a/1.mp3", track("X", "Z", "one"));
    h.run(RunMode::Add);
    let album = h.album_of("a/1.mp3");
    assert_eq!(album.added, 300);

    h.set_clock(500);
    write(&h, "a/2.mp3", track("X", "Z", "two"));
    h.run(RunMode::Add);
    assert_eq!(h.album_of("a/2.mp3").added, 300);
}

#[test]
fn second_run_while_busy_fails_fast() {
    let h = Harness::new();
    write(&h, "a/1.mp3", track("X", "Z", "t"));

    let guard = h.library().try_begin_run(RunMode::Full).expect("lock");
    assert_eq!(h.library().running(), Some(RunMode::Full));
    let err = h
        .library()
        .reconcile(RunMode::Add, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, RunError::Busy(RunMode::Full)));
    assert_eq!(h.catalog().stats().expect("stats").tracks, 0);

    drop(guard);
    assert_eq!(h.library().running(), None);
    assert_eq!(h.run(RunMode::Add).created, 1);
    assert_eq!(h.library().running(), None);
}

#[test]
fn missing_root_fails_before_any_write() {
    let h = Harness::new();
    fs::remove_dir_all(&h.root).expect("remove root");

    let err = h
        .library()
        .reconcile(RunMode::Add, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, RunError::RootUnreadable(_, _)));
    assert_eq!(h.catalog().stats().expect("stats").artists, 0);
    assert_eq!(h.library().running(), None);
}

#[test]
fn cancelled_run_skips_the_sweep() {
    let h = Harness::new();
    write(&h, "a/1.mp3", track("X", "Z", "t"));
    write(&h, "b/1.mp3", track("Y", "W", "u"));
    h.run(RunMode::Add);
    h.remove("b/1.mp3");

    let cancel = CancelToken::new();
    cancel.cancel();
    let report = h
        .library()
        .reconcile(RunMode::Add, &cancel)
        .expect("reconcile");
    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.deleted, 0);
    assert!(h.track_at("b/1.mp3").is_some());

    let resumed = h.run(RunMode::Add);
    assert_eq!(resumed.deleted, 1);
    assert!(h.track_at("b/1.mp3").is_none());
}

#[test]
fn parallel_fingerprinting_matches_sequential() {
    let h = Harness::with_options(|options| options.workers = 4);
    for disc in 0..5 {
        for n in 0..30 {
            let relpath = format!("D{}/{:02}.mp3", disc, n);
            write(&h, &relpath, track(&format!("A{}", disc), "Album", &format!("T{}", n)));
        }
    }
    let report = h.run(RunMode::Full);
    assert_eq!(report.created, 150);
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(h.catalog().stats().expect("stats").albums, 5);
    assert_eq!(h.run(RunMode::Full).mutations(), 0);
}

#[test]
fn search_uses_normalized_names() {
    let h = Harness::new();
    write(&h, "a/1.mp3", track("Björk", "Homogenic", "t"));
    write(&h, "b/1.mp3", track("Other", "Debut & More", "u"));
    h.run(RunMode::Add);

    let (artists, total) = h.catalog().list_artists(Some("BJORK"), 10, 0).expect("list");
    assert_eq!(total, 1);
    assert_eq!(artists[0].name, "Björk");
    let (albums, _) = h.catalog().list_albums(Some("and more"), 10, 0).expect("list");
    assert_eq!(albums.len(), 1);
    assert_eq!(albums[0].title, "Debut & More");
}

#[test]
fn retagged_spelling_renames_artist_and_album() {
    let h = Harness::new();
    write(&h, "a/1.mp3", track("Artist Name", "Album Name", "t"));
    h.run(RunMode::Add);
    let album_before = h.album_of("a/1.mp3");
    let artist_id = h.track_at("a/1.mp3").expect("track").artist_id;

    write(&h, "a/1.mp3", track("artist name", "album name", "t"));
    let report = h.run(RunMode::Add);
    assert_eq!(report.updated, 1);

    let artist = h.catalog().get_artist(&artist_id).expect("lookup").expect("artist");
    assert_eq!(artist.name, "artist name");
    let album = h.album_of("a/1.mp3");
    assert_eq!(album.id, album_before.id);
    assert_eq!(album.title, "album name");
}

#[test]
fn respelling_waits_until_every_track_agrees() {
    let h = Harness::new();
    write(&h, "a/1.mp3", track("Artist Name", "Album Name", "one"));
    write(&h, "a/2.mp3", track("Artist Name", "Album Name", "two"));
    h.run(RunMode::Add);
    let artist_id = h.track_at("a/1.mp3").expect("track").artist_id;
    let artist_name = |h: &Harness| {
        h.catalog()
            .get_artist(&artist_id)
            .expect("lookup")
            .expect("artist")
            .name
    };

    write(&h, "a/1.mp3", track("artist name", "album name", "one"));
    h.run(RunMode::Add);
    assert_eq!(artist_name(&h), "Artist Name");
    assert_eq!(h.album_of("a/1.mp3").title, "Album Name");

    write(&h, "a/2.mp3", track("artist name", "album name", "two"));
    h.run(RunMode::Add);
    assert_eq!(artist_name(&h), "artist name");
    assert_eq!(h.album_of("a/2.mp3").title, "album name");
    assert_eq!(h.catalog().stats().expect("stats").albums, 1);
}

#[test]
fn prefix_case_and_bucket_title_follow_a_respelling() {
    let h = Harness::new();
    h.write_track("a/1.mp3", &[("artist", "The Loose Band"), ("title", "stray")]);
    h.run(RunMode::Add);
    assert_eq!(h.album_of("a/1.mp3").title, "Non-Album Tracks: The Loose Band");

    h.write_track("a/1.mp3", &[("artist", "the LOOSE band"), ("title", "stray")]);
    h.run(RunMode::Add);
    let track = h.track_at("a/1.mp3").expect("track");
    let artist = h.catalog().get_artist(&track.artist_id).expect("lookup").expect("artist");
    assert_eq!(artist.display_name(), "the LOOSE band");
    assert_eq!(h.album_of("a/1.mp3").title, "Non-Album Tracks: the LOOSE band");
}

#[cfg(unix)]
#[test]
fn dangling_link_over_a_known_track_keeps_its_row() {
    let h = Harness::new();
    write(&h, "a/1.mp3", track("X", "Z", "t"));
    h.run(RunMode::Add);
    let before = h.track_at("a/1.mp3").expect("track");

    h.remove("a/1.mp3");
    std::os::unix::fs::symlink(h.path("gone.mp3"), h.path("a/1.mp3")).expect("symlink");
    let report = h.run(RunMode::Full);
    assert_eq!(report.status, RunStatus::PartialSuccess);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].relpath, "a/1.mp3");
    assert_eq!(report.skipped[0].reason, SkipReason::Unreadable);
    assert_eq!(report.deleted, 0);
    assert_eq!(h.track_at("a/1.mp3").expect("kept").id, before.id);
}
