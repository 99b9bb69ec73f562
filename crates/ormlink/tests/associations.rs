//! Relationship resolution, association reads and writes, and preloading.

mod common;

use common::{
    Company, Email, Language, Member, Pet, Profile, Tags, Toy, User, count_rows, sqlite_db, user,
};
use ormlink::prelude::*;
use ormlink::{ConfigErrorKind, PreconditionErrorKind, RelationshipKind};

fn email(address: &str) -> Email {
    Email {
        email: address.to_string(),
        ..Email::default()
    }
}

fn language(name: &str) -> Language {
    Language {
        name: name.to_string(),
        ..Language::default()
    }
}

fn toy(name: &str) -> Toy {
    Toy {
        name: name.to_string(),
        ..Toy::default()
    }
}

fn join_rows(db: &Db, user_id: i64) -> i64 {
    count_rows(
        db,
        "SELECT count(*) FROM user_languages WHERE user_id = ?",
        args![user_id],
    )
}

#[test]
fn relationship_kinds_are_inferred() {
    let db = sqlite_db();
    let mut owner = user("alice", 30);
    let kinds: Vec<(&str, RelationshipKind)> = ["company", "emails", "languages", "toys"]
        .into_iter()
        .map(|name| {
            let assoc = db.association(&mut owner, name).expect("relation exists");
            (name, assoc.kind())
        })
        .collect();
    assert_eq!(
        kinds,
        [
            ("company", RelationshipKind::BelongsTo),
            ("emails", RelationshipKind::HasMany),
            ("languages", RelationshipKind::ManyToMany),
            ("toys", RelationshipKind::HasMany),
        ]
    );

    let err = db
        .association(&mut owner, "age")
        .err()
        .expect("scalar field is not a relation");
    assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownName));
}

#[test]
fn create_saves_nested_associations() {
    let db = sqlite_db();
    let mut alice = User {
        company: Some(Company {
            name: "acme".to_string(),
            ..Company::default()
        }),
        emails: vec![email("a@example.com"), email("alice@example.com")],
        languages: vec![language("en"), language("fr")],
        ..user("alice", 30)
    };
    db.create(&mut alice).expect("create with associations");

    let company_id = alice.company.as_ref().map(|c| c.id).expect("company kept");
    assert!(company_id > 0);
    assert_eq!(alice.company_id, Some(company_id));
    assert!(alice.emails.iter().all(|e| e.id > 0 && e.user_id == alice.id));
    assert!(alice.languages.iter().all(|l| l.id > 0));

    assert_eq!(db.count::<Email>().expect("emails"), 2);
    assert_eq!(db.count::<Language>().expect("languages"), 2);
    assert_eq!(join_rows(&db, alice.id), 2);

    let mut stored = User::default();
    db.filter(alice.id, args![]).find(&mut stored).expect("reload");
    assert_eq!(stored.company_id, Some(company_id));
}

#[test]
fn without_associations_saves_only_the_owner() {
    let db = sqlite_db();
    let mut bob = User {
        emails: vec![email("bob@example.com")],
        ..user("bob", 20)
    };
    db.without_associations().create(&mut bob).expect("create bare");
    assert!(bob.id > 0);
    assert_eq!(bob.emails[0].id, 0);
    assert_eq!(db.count::<Email>().expect("emails"), 0);

    let mut carol = User {
        emails: vec![email("carol@example.com")],
        ..user("carol", 20)
    };
    db.omit(["emails"]).create(&mut carol).expect("create omitting emails");
    assert_eq!(db.count::<Email>().expect("emails"), 0);
}

#[test]
fn has_many_append_adds_one_row() {
    let db = sqlite_db();
    let mut alice = User {
        emails: vec![email("one@example.com"), email("two@example.com")],
        ..user("alice", 30)
    };
    db.create(&mut alice).expect("create alice");

    let mut emails = db.association(&mut alice, "emails").expect("emails");
    assert_eq!(emails.count().expect("count before"), 2);
    emails
        .append([email("three@example.com")])
        .expect("append email");
    assert_eq!(emails.count().expect("count after"), 3);

    assert_eq!(alice.emails.len(), 3);
    let appended = &alice.emails[2];
    assert!(appended.id > 0);
    assert_eq!(appended.user_id, alice.id);
}

#[test]
fn association_reads_are_scoped_to_the_owner() {
    let db = sqlite_db();
    let mut alice = User {
        emails: vec![email("a1@example.com"), email("a2@example.com")],
        ..user("alice", 30)
    };
    let mut bob = User {
        emails: vec![email("b1@example.com")],
        ..user("bob", 30)
    };
    db.create(&mut alice).expect("create alice");
    db.create(&mut bob).expect("create bob");

    let mut found: Vec<Email> = Vec::new();
    db.association(&mut bob, "emails")
        .expect("emails")
        .find(&mut found)
        .expect("find bob's emails");
    let addresses: Vec<&str> = found.iter().map(|e| e.email.as_str()).collect();
    assert_eq!(addresses, ["b1@example.com"]);

    let mut ordered: Vec<Email> = Vec::new();
    db.order("email desc")
        .association(&mut alice, "emails")
        .expect("emails")
        .find(&mut ordered)
        .expect("find ordered");
    let addresses: Vec<&str> = ordered.iter().map(|e| e.email.as_str()).collect();
    assert_eq!(addresses, ["a2@example.com", "a1@example.com"]);

    let mut wrong: Vec<Company> = Vec::new();
    let err = db
        .association(&mut alice, "emails")
        .expect("emails")
        .find(&mut wrong)
        .expect_err("destination type must match");
    assert_eq!(err.precondition_kind(), Some(PreconditionErrorKind::WrongDestination));
}

#[test]
fn unsaved_owner_cannot_use_has_many() {
    let db = sqlite_db();
    let mut draft = user("draft", 1);
    let err = db
        .association(&mut draft, "emails")
        .expect("emails")
        .count()
        .expect_err("owner has no key");
    assert_eq!(err.precondition_kind(), Some(PreconditionErrorKind::BlankPrimaryKey));
}

#[test]
fn many_to_many_append_is_idempotent() {
    let db = sqlite_db();
    let mut alice = user("alice", 30);
    db.create(&mut alice).expect("create alice");
    let mut english = language("en");
    db.create(&mut english).expect("create language");

    let mut languages = db.association(&mut alice, "languages").expect("languages");
    languages.append([english.clone()]).expect("first append");
    languages.append([english.clone()]).expect("second append");
    assert_eq!(languages.count().expect("count"), 1);
    assert_eq!(join_rows(&db, alice.id), 1);

    let mut found: Vec<Language> = Vec::new();
    db.association(&mut alice, "languages")
        .expect("languages")
        .find(&mut found)
        .expect("find languages");
    assert_eq!(found, [english]);
}

#[test]
fn many_to_many_delete_clear_and_replace() {
    let db = sqlite_db();
    let mut alice = User {
        languages: vec![language("en"), language("fr"), language("de")],
        ..user("alice", 30)
    };
    db.create(&mut alice).expect("create alice");
    let french = alice.languages[1].clone();

    let removed = db
        .association(&mut alice, "languages")
        .expect("languages")
        .delete(&[french])
        .expect("unlink french");
    assert_eq!(removed, 1);
    assert_eq!(join_rows(&db, alice.id), 2);
    assert_eq!(db.count::<Language>().expect("languages kept"), 3);
    let held: Vec<&str> = alice.languages.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(held, ["en", "de"]);

    db.association(&mut alice, "languages")
        .expect("languages")
        .replace([language("es")])
        .expect("replace languages");
    assert_eq!(join_rows(&db, alice.id), 1);
    assert_eq!(alice.languages.len(), 1);
    assert_eq!(alice.languages[0].name, "es");

    let cleared = db
        .association(&mut alice, "languages")
        .expect("languages")
        .clear()
        .expect("clear languages");
    assert_eq!(cleared, 1);
    assert_eq!(join_rows(&db, alice.id), 0);
    assert!(alice.languages.is_empty());
}

#[test]
fn has_many_delete_and_clear_unlink_children() {
    let db = sqlite_db();
    let mut alice = User {
        emails: vec![email("a@example.com"), email("b@example.com"), email("c@example.com")],
        ..user("alice", 30)
    };
    db.create(&mut alice).expect("create alice");
    let first = alice.emails[0].clone();

    let mut emails = db.association(&mut alice, "emails").expect("emails");
    assert_eq!(emails.delete(&[first]).expect("unlink one"), 1);
    assert_eq!(emails.count().expect("count"), 2);
    assert_eq!(emails.clear().expect("clear"), 2);
    assert_eq!(emails.count().expect("count after clear"), 0);

    assert!(alice.emails.is_empty());
    assert_eq!(db.count::<Email>().expect("rows are kept"), 3);
    assert_eq!(
        count_rows(&db, "SELECT count(*) FROM emails WHERE user_id IS NULL", args![]),
        3
    );
}

#[test]
fn belongs_to_append_load_and_clear() {
    let db = sqlite_db();
    let mut alice = user("alice", 30);
    db.create(&mut alice).expect("create alice");

    let mut company = db.association(&mut alice, "company").expect("company");
    assert_eq!(company.count().expect("no company yet"), 0);
    company
        .append([Company {
            name: "acme".to_string(),
            ..Company::default()
        }])
        .expect("set company");
    assert_eq!(company.count().expect("count"), 1);

    let company_id = alice.company.as_ref().map(|c| c.id).expect("company held");
    assert_eq!(alice.company_id, Some(company_id));

    let mut stored = User::default();
    db.filter(alice.id, args![]).find(&mut stored).expect("reload");
    assert_eq!(stored.company_id, Some(company_id));
    assert!(stored.company.is_none());
    db.association(&mut stored, "company")
        .expect("company")
        .load()
        .expect("load company");
    assert_eq!(stored.company.as_ref().map(|c| c.name.as_str()), Some("acme"));

    db.association(&mut alice, "company")
        .expect("company")
        .clear()
        .expect("clear company");
    assert_eq!(alice.company_id, None);
    assert!(alice.company.is_none());
    db.filter(alice.id, args![]).find(&mut stored).expect("reload");
    assert_eq!(stored.company_id, None);
    assert_eq!(db.count::<Company>().expect("company row kept"), 1);
}

#[test]
fn polymorphic_children_are_tagged_by_owner_type() {
    let db = sqlite_db();
    let mut alice = User {
        toys: vec![toy("kite")],
        ..user("alice", 30)
    };
    db.create(&mut alice).expect("create alice");
    let mut rex = Pet {
        name: "rex".to_string(),
        toys: vec![toy("ball"), toy("bone")],
        ..Pet::default()
    };
    db.create(&mut rex).expect("create pet");
    assert_eq!(alice.id, rex.id, "owners share a key but not a type");

    assert_eq!(alice.toys[0].owner_type, "users");
    assert_eq!(rex.toys[0].owner_type, "pet");
    assert_eq!(rex.toys[1].owner_id, rex.id);

    let mut pet_toys = db.association(&mut rex, "toys").expect("pet toys");
    assert_eq!(pet_toys.relationship().discriminator(), Some(("owner_type", "pet")));
    assert_eq!(pet_toys.count().expect("pet toy count"), 2);
    pet_toys.append([toy("rope")]).expect("append pet toy");
    assert_eq!(pet_toys.count().expect("pet toy count"), 3);

    let user_toys = db.association(&mut alice, "toys").expect("user toys");
    assert_eq!(user_toys.count().expect("user toy count"), 1);
}

#[test]
fn preload_fills_relations_per_record() {
    let db = sqlite_db();
    let mut alice = User {
        company: Some(Company {
            name: "acme".to_string(),
            ..Company::default()
        }),
        emails: vec![email("a1@example.com"), email("a2@example.com")],
        languages: vec![language("en")],
        ..user("alice", 30)
    };
    let mut bob = User {
        emails: vec![email("b1@example.com")],
        ..user("bob", 25)
    };
    db.create(&mut alice).expect("create alice");
    db.create(&mut bob).expect("create bob");

    let mut users: Vec<User> = Vec::new();
    db.preload("emails")
        .preload("languages")
        .preload("company")
        .order("id")
        .find(&mut users)
        .expect("find with preload");

    assert_eq!(users.len(), 2);
    assert_eq!(users[0].emails.len(), 2);
    assert_eq!(users[0].languages.len(), 1);
    assert_eq!(users[0].languages[0].name, "en");
    assert_eq!(users[0].company.as_ref().map(|c| c.name.as_str()), Some("acme"));
    assert_eq!(users[1].emails.len(), 1);
    assert!(users[1].languages.is_empty());
    assert!(users[1].company.is_none());

    let mut plain: Vec<User> = Vec::new();
    db.order("id").find(&mut plain).expect("find without preload");
    assert!(plain.iter().all(|u| u.emails.is_empty()));
}

#[test]
fn save_updates_existing_children() {
    let db = sqlite_db();
    let mut alice = User {
        emails: vec![email("old@example.com")],
        ..user("alice", 30)
    };
    db.create(&mut alice).expect("create alice");

    alice.emails[0].email = "new@example.com".to_string();
    alice.emails.push(email("extra@example.com"));
    db.save(&mut alice).expect("save alice");

    let mut stored: Vec<Email> = Vec::new();
    db.order("id").find(&mut stored).expect("find emails");
    let addresses: Vec<&str> = stored.iter().map(|e| e.email.as_str()).collect();
    assert_eq!(addresses, ["new@example.com", "extra@example.com"]);
    assert!(stored.iter().all(|e| e.user_id == alice.id));
}

fn member(name: &str) -> Member {
    Member {
        name: name.to_string(),
        ..Member::default()
    }
}

#[test]
fn has_one_count_find_and_append() {
    let db = sqlite_db();
    let mut ann = member("ann");
    db.create(&mut ann).expect("create ann");
    let mut bob = member("bob");
    db.create(&mut bob).expect("create bob");

    let mut profile = db.association(&mut ann, "profile").expect("profile");
    assert_eq!(profile.kind(), RelationshipKind::HasOne);
    assert_eq!(profile.count().expect("no profile yet"), 0);
    profile
        .append([Profile {
            bio: "painter".to_string(),
            tags: Tags::of(&["art", "oil"]),
            ..Profile::default()
        }])
        .expect("append profile");
    assert_eq!(profile.count().expect("count"), 1);

    let held = ann.profile.clone().expect("profile held");
    assert!(held.id > 0);
    assert_eq!(held.member_id, ann.id);

    let bobs = db.association(&mut bob, "profile").expect("profile");
    assert_eq!(bobs.count().expect("bob count"), 0);

    let mut found: Vec<Profile> = Vec::new();
    db.association(&mut ann, "profile")
        .expect("profile")
        .find(&mut found)
        .expect("find profile");
    assert_eq!(found, vec![held]);
    assert_eq!(found[0].tags, Tags::of(&["art", "oil"]));
}

#[test]
fn scanner_field_round_trips() {
    let db = sqlite_db();
    let mut profile = Profile {
        bio: "quiet".to_string(),
        tags: Tags::of(&["a", "b", "c"]),
        ..Profile::default()
    };
    db.create(&mut profile).expect("create profile");
    assert_eq!(
        count_rows(
            &db,
            "SELECT count(*) FROM profiles WHERE tags = ?",
            args!["a,b,c"]
        ),
        1
    );

    let mut stored = Profile::default();
    db.filter(profile.id, args![]).find(&mut stored).expect("reload");
    assert_eq!(stored.tags, Tags::of(&["a", "b", "c"]));

    let mut untagged = Profile::default();
    db.create(&mut untagged).expect("create untagged");
    let mut stored = Profile::default();
    db.filter(untagged.id, args![]).find(&mut stored).expect("reload untagged");
    assert_eq!(stored.tags, Tags::default());
}

#[test]
fn single_append_keeps_stored_columns_left_blank() {
    let db = sqlite_db();
    let mut acme = Company {
        name: "acme".to_string(),
        ..Company::default()
    };
    db.create(&mut acme).expect("create company");
    let mut alice = user("alice", 30);
    db.create(&mut alice).expect("create alice");

    db.association(&mut alice, "company")
        .expect("company")
        .append([Company {
            id: acme.id,
            ..Company::default()
        }])
        .expect("link company by key");
    assert_eq!(alice.company_id, Some(acme.id));
    assert_eq!(alice.company.as_ref().map(|c| c.name.as_str()), Some("acme"));
    let mut stored = Company::default();
    db.filter(acme.id, args![]).find(&mut stored).expect("reload company");
    assert_eq!(stored.name, "acme");

    let mut ann = member("ann");
    db.create(&mut ann).expect("create ann");
    db.association(&mut ann, "profile")
        .expect("profile")
        .append([Profile {
            bio: "painter".to_string(),
            tags: Tags::of(&["art"]),
            ..Profile::default()
        }])
        .expect("append profile");
    let profile_id = ann.profile.as_ref().map(|p| p.id).expect("profile held");

    db.association(&mut ann, "profile")
        .expect("profile")
        .append([Profile {
            id: profile_id,
            bio: "sculptor".to_string(),
            ..Profile::default()
        }])
        .expect("overlay profile");
    let mut stored = Profile::default();
    db.filter(profile_id, args![]).find(&mut stored).expect("reload profile");
    assert_eq!(stored.bio, "sculptor");
    assert_eq!(stored.tags, Tags::of(&["art"]));
    assert_eq!(stored.member_id, ann.id);
}
