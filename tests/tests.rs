extern crate blabber;
extern crate tempdir;

use tempdir::TempDir;

use blabber::{Database, ErrorKind, Options};

fn open(temp: &TempDir) -> Database {
	Database::open(temp.path().join("db"), Options::default()).unwrap()
}

#[test]
fn scenario_1_create_post_then_fetch_it() {
	let temp = TempDir::new("blabber_scenario_1").unwrap();
	let mut db = open(&temp);

	let id = db.create_post("alice", "hi", "hello world").unwrap();
	assert_eq!(id, 1);

	let post = db.fetch_post(1, 10).unwrap();
	assert_eq!(post.id, 1);
	assert_eq!(post.user, "alice");
	assert_eq!(post.title, "hi");
	assert_eq!(post.content, "hello world");
	assert!(post.comments.is_empty());
}

#[test]
fn scenario_2_frontpage_is_newest_first() {
	let temp = TempDir::new("blabber_scenario_2").unwrap();
	let mut db = open(&temp);

	db.create_post("alice", "hi", "hello world").unwrap();
	let second = db.create_post("bob", "second", &"x".repeat(100)).unwrap();
	assert_eq!(second, 2);

	let page = db.fetch_frontpage(10).unwrap();
	assert_eq!(page.len(), 2);
	assert_eq!(page[0].id, 2);
	assert_eq!(page[0].user, "bob");
	assert_eq!(page[0].title, "second");
	assert_eq!(page[1].id, 1);
	assert_eq!(page[1].user, "alice");
	assert_eq!(page[1].title, "hi");
}

#[test]
fn scenario_3_comments_are_newest_first() {
	let temp = TempDir::new("blabber_scenario_3").unwrap();
	let mut db = open(&temp);

	db.create_post("alice", "hi", "hello world").unwrap();
	db.create_post("bob", "second", &"x".repeat(100)).unwrap();

	db.create_comment(2, "carol", "nice").unwrap();
	db.create_comment(2, "dave", "+1").unwrap();

	let post = db.fetch_post(2, 10).unwrap();
	let comments: Vec<(&str, &str)> = post.comments.iter().map(|c| (c.user.as_str(), c.content.as_str())).collect();
	assert_eq!(comments, vec![("dave", "+1"), ("carol", "nice")]);
}

#[test]
fn scenario_4_comment_on_unknown_post_is_not_found() {
	let temp = TempDir::new("blabber_scenario_4").unwrap();
	let mut db = open(&temp);

	let err = db.create_comment(999, "x", "y").unwrap_err();
	assert_eq!(*err.kind(), ErrorKind::NotFound);
}

#[test]
fn scenario_5_state_survives_close_and_reopen() {
	let temp = TempDir::new("blabber_scenario_5").unwrap();
	let path = temp.path().join("db");

	{
		let mut db = Database::open(&path, Options::default()).unwrap();
		db.create_post("alice", "hi", "hello world").unwrap();
		db.create_post("bob", "second", &"x".repeat(100)).unwrap();
		db.create_comment(2, "carol", "nice").unwrap();
		db.create_comment(2, "dave", "+1").unwrap();
		db.finish().unwrap();
	}

	let mut db = Database::open(&path, Options::default()).unwrap();

	let page = db.fetch_frontpage(10).unwrap();
	assert_eq!(page.len(), 2);
	assert_eq!(page[0].id, 2);
	assert_eq!(page[1].id, 1);

	let post = db.fetch_post(2, 10).unwrap();
	let users: Vec<&str> = post.comments.iter().map(|c| c.user.as_str()).collect();
	assert_eq!(users, vec!["dave", "carol"]);
}

#[test]
fn scenario_6_short_title_long_content_boundary() {
	let temp = TempDir::new("blabber_scenario_6").unwrap();
	let mut db = open(&temp);

	// title cap is 31: "t" stays inline; content is not capped and always
	// lives on the heap regardless of length.
	let content = "a".repeat(40);
	let id = db.create_post("u", "t", &content).unwrap();

	let post = db.fetch_post(id, 10).unwrap();
	assert_eq!(post.title, "t");
	assert_eq!(post.content, content);
}

#[test]
fn scenario_7_long_title_spills_to_heap() {
	let temp = TempDir::new("blabber_scenario_7").unwrap();
	let mut db = open(&temp);

	// title cap is 31; 40 bytes exceeds it and must spill to the heap.
	let title = "t".repeat(40);
	let id = db.create_post("u", &title, "c").unwrap();

	let post = db.fetch_post(id, 10).unwrap();
	assert_eq!(post.title, title);
}

#[test]
fn ids_are_strictly_increasing_from_one() {
	let temp = TempDir::new("blabber_ids").unwrap();
	let mut db = open(&temp);

	let ids: Vec<u64> = (0..10)
		.map(|i| db.create_post("u", &format!("t{}", i), "c").unwrap())
		.collect();

	assert_eq!(ids, (1..=10).collect::<Vec<u64>>());
}

#[test]
fn created_at_is_bracketed_by_wall_clock() {
	use std::time::{SystemTime, UNIX_EPOCH};

	let temp = TempDir::new("blabber_created_at").unwrap();
	let mut db = open(&temp);

	let t0 = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
	let id = db.create_post("u", "t", "c").unwrap();
	let t1 = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();

	let post = db.fetch_post(id, 10).unwrap();
	assert!(post.created_at >= t0 && post.created_at <= t1);
}

#[test]
fn fetch_frontpage_respects_the_limit() {
	let temp = TempDir::new("blabber_frontpage_limit").unwrap();
	let mut db = open(&temp);

	for i in 0..20 {
		db.create_post("u", &format!("t{}", i), "c").unwrap();
	}

	let page = db.fetch_frontpage(5).unwrap();
	assert_eq!(page.len(), 5);
	let ids: Vec<u64> = page.iter().map(|p| p.id).collect();
	assert_eq!(ids, vec![20, 19, 18, 17, 16]);
}

#[test]
fn fetch_post_of_unknown_id_is_not_found() {
	let temp = TempDir::new("blabber_fetch_unknown").unwrap();
	let mut db = open(&temp);

	let err = db.fetch_post(1, 10).unwrap_err();
	assert_eq!(*err.kind(), ErrorKind::NotFound);
}

#[test]
fn finish_twice_reports_already_closed() {
	let temp = TempDir::new("blabber_finish_twice").unwrap();
	let mut db = open(&temp);

	db.finish().unwrap();
	let err = db.finish().unwrap_err();
	assert_eq!(*err.kind(), ErrorKind::AlreadyClosed);
}

#[test]
fn operations_after_finish_report_shut_down() {
	let temp = TempDir::new("blabber_shut_down").unwrap();
	let mut db = open(&temp);

	db.finish().unwrap();
	let err = db.create_post("u", "t", "c").unwrap_err();
	assert_eq!(*err.kind(), ErrorKind::ShutDown);
}

#[test]
fn invalid_cache_blocks_option_is_rejected() {
	let temp = TempDir::new("blabber_invalid_options").unwrap();
	let options = Options { cache_blocks: 0, ..Options::default() };

	let err = Database::open(temp.path().join("db"), options).unwrap_err();
	match err.kind() {
		&ErrorKind::InvalidOptions(..) => (),
		other => panic!("expected InvalidOptions, got {:?}", other),
	}
}

#[test]
fn dump_is_deterministic_given_the_same_input() {
	let temp = TempDir::new("blabber_dump").unwrap();
	let mut db = open(&temp);

	db.create_post("alice", "hi", "hello world").unwrap();
	db.create_comment(1, "bob", "nice post").unwrap();

	let mut first = Vec::new();
	db.dump(&mut first).unwrap();

	let mut second = Vec::new();
	db.dump(&mut second).unwrap();

	assert_eq!(first, second);
	assert!(!first.is_empty());
}
