use std::sync::Arc;

use tokio_test::{assert_err, assert_ok};

use super::conflict::{check_transition, settled_status, validate_date, validate_slot};
use super::*;
use crate::limits::*;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn appointment_on(ds: &DayState, slot: u8, status: AppointmentStatus) -> Appointment {
    Appointment {
        id: ObjectId::new(),
        client_id: ObjectId::new(),
        stylist_id: ds.key.stylist_id,
        date: ds.key.date,
        slot_number: slot,
        status,
        created_at: 0,
        updated_at: 0,
    }
}

fn stylist_named(name: &str) -> User {
    User {
        id: ObjectId::new(),
        name: name.into(),
        role: Role::Stylist,
    }
}

// ── Pure functions ───────────────────────────────────────

#[test]
fn free_slots_excludes_booked() {
    assert_eq!(free_slots(&[]), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(free_slots(&[5]), vec![1, 2, 3, 4, 6, 7, 8]);
    assert_eq!(free_slots(&[8, 1, 4]), vec![2, 3, 5, 6, 7]);
    assert!(free_slots(&[1, 2, 3, 4, 5, 6, 7, 8]).is_empty());
}

#[test]
fn day_availability_ignores_inactive_bookings() {
    let mut ds = DayState::new(DayKey::new(ObjectId::new(), date(2024, 6, 1)));
    let cancelled = appointment_on(&ds, 2, AppointmentStatus::Cancelled);
    let accepted = appointment_on(&ds, 7, AppointmentStatus::Accepted);
    let completed = appointment_on(&ds, 3, AppointmentStatus::Completed);
    ds.appointments.extend([cancelled, accepted, completed]);

    assert_eq!(day_availability(Some(&ds)), Some(vec![1, 2, 3, 4, 5, 6, 8]));
    assert_eq!(day_availability(None), Some(vec![1, 2, 3, 4, 5, 6, 7, 8]));
}

#[test]
fn day_availability_on_leave_is_none() {
    let key = DayKey::new(ObjectId::new(), date(2024, 6, 1));
    let mut ds = DayState::new(key);
    ds.leave = Some(Leave {
        id: ObjectId::new(),
        stylist_id: key.stylist_id,
        date: key.date,
    });
    assert_eq!(day_availability(Some(&ds)), None);
}

#[test]
fn available_stylists_drops_those_on_leave() {
    let ana = stylist_named("Ana");
    let bo = stylist_named("Bo");
    let cy = stylist_named("Cy");
    let stylists = vec![cy.clone(), ana.clone(), bo.clone()];
    let on_leave: HashSet<ObjectId> = [bo.id].into_iter().collect();

    let free = available_stylists(&stylists, &on_leave);
    assert_eq!(free, vec![ana, cy]);
}

#[test]
fn slot_validation() {
    assert_eq!(validate_slot(1).unwrap(), 1);
    assert_eq!(validate_slot(8).unwrap(), 8);
    assert_eq!(validate_slot(0), Err(EngineError::InvalidSlot(0)));
    assert_eq!(validate_slot(9), Err(EngineError::InvalidSlot(9)));
    assert_eq!(validate_slot(-1), Err(EngineError::InvalidSlot(-1)));
    assert_eq!(validate_slot(300), Err(EngineError::InvalidSlot(300)));
}

#[test]
fn date_validation() {
    assert_ok!(validate_date(date(2024, 6, 1)));
    assert_ok!(validate_date(date(MIN_VALID_DATE.0, 1, 1)));
    assert_err!(validate_date(date(1999, 12, 31)));
    assert_err!(validate_date(date(2200, 1, 1)));
}

#[test]
fn transition_rules() {
    let mut ds = DayState::new(DayKey::new(ObjectId::new(), date(2024, 6, 1)));
    let cancelled = appointment_on(&ds, 4, AppointmentStatus::Cancelled);
    ds.appointments.push(cancelled.clone());

    // identical status is refused
    assert!(matches!(
        check_transition(&ds, &cancelled, AppointmentStatus::Cancelled),
        Err(EngineError::AlreadyInState { .. })
    ));
    // permissive: cancelled may be accepted while the slot is free
    assert_ok!(check_transition(&ds, &cancelled, AppointmentStatus::Accepted));

    // but not once someone else holds the slot
    ds.appointments.push(appointment_on(&ds, 4, AppointmentStatus::Pending));
    assert!(matches!(
        check_transition(&ds, &cancelled, AppointmentStatus::Accepted),
        Err(EngineError::SlotTaken { slot: 4, .. })
    ));
    // moving between inactive statuses never conflicts
    assert_ok!(check_transition(&ds, &cancelled, AppointmentStatus::Rejected));
}

#[test]
fn settlement_targets() {
    assert_eq!(settled_status(AppointmentStatus::Pending), Some(AppointmentStatus::Expired));
    assert_eq!(settled_status(AppointmentStatus::Accepted), Some(AppointmentStatus::Completed));
    assert_eq!(settled_status(AppointmentStatus::Cancelled), None);
    assert_eq!(settled_status(AppointmentStatus::Expired), None);
}

// ── Async engine tests ───────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("chairtime_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

struct Salon {
    engine: Engine,
    stylist: ObjectId,
    client: ObjectId,
}

async fn salon(wal: &str) -> Salon {
    let engine = Engine::new(test_wal_path(wal)).unwrap();
    let stylist = ObjectId::new();
    let client = ObjectId::new();
    engine.register_user(stylist, "Mara".into(), Role::Stylist).await.unwrap();
    engine.register_user(client, "Jo".into(), Role::Client).await.unwrap();
    Salon { engine, stylist, client }
}

async fn book(s: &Salon, day: NaiveDate, slot: i64) -> Appointment {
    match s.engine.create_appointment(s.client, s.stylist, day, slot).await.unwrap() {
        BookingOutcome::Booked(a) => a,
        BookingOutcome::StylistOnLeave => panic!("stylist unexpectedly on leave"),
    }
}

#[tokio::test]
async fn booking_creates_pending_appointment() {
    let s = salon("book_pending.wal").await;
    let day = date(2024, 6, 1);
    let appt = book(&s, day, 5).await;

    assert_eq!(appt.status, AppointmentStatus::Pending);
    assert_eq!(appt.slot_number, 5);
    assert_eq!(appt.client_id, s.client);
    assert_eq!(appt.created_at, appt.updated_at);
    assert_eq!(s.engine.get_appointment(&appt.id.to_string()).await.unwrap(), appt);
    assert_eq!(
        s.engine.available_slots(s.stylist, day).await.unwrap(),
        vec![1, 2, 3, 4, 6, 7, 8]
    );
}

#[tokio::test]
async fn untouched_day_is_fully_free() {
    let s = salon("free_day.wal").await;
    assert_eq!(
        s.engine.available_slots(s.stylist, date(2024, 7, 1)).await.unwrap(),
        vec![1, 2, 3, 4, 5, 6, 7, 8]
    );
}

#[tokio::test]
async fn second_booking_of_same_slot_is_taken() {
    let s = salon("slot_taken.wal").await;
    let day = date(2024, 6, 1);
    book(&s, day, 3).await;

    let other_client = ObjectId::new();
    s.engine.register_user(other_client, "Kim".into(), Role::Client).await.unwrap();
    let err = s.engine.create_appointment(other_client, s.stylist, day, 3).await.unwrap_err();
    assert_eq!(err, EngineError::SlotTaken { stylist_id: s.stylist, date: day, slot: 3 });
    assert_eq!(err.status_code(), 400);
    assert_eq!(s.engine.list_all_appointments().await.len(), 1);
}

#[tokio::test]
async fn booking_on_leave_returns_outcome_and_persists_nothing() {
    let s = salon("on_leave.wal").await;
    let day = date(2024, 6, 1);
    s.engine.record_leave(s.stylist, day).await.unwrap();

    let outcome = s.engine.create_appointment(s.client, s.stylist, day, 3).await.unwrap();
    assert_eq!(outcome, BookingOutcome::StylistOnLeave);
    assert!(s.engine.list_all_appointments().await.is_empty());
    assert!(s.engine.list_pending_for_client(s.client).await.is_empty());
}

#[tokio::test]
async fn leave_makes_availability_unavailable_even_with_bookings() {
    let s = salon("leave_unavailable.wal").await;
    let day = date(2024, 6, 1);
    book(&s, day, 1).await;
    s.engine.record_leave(s.stylist, day).await.unwrap();

    let err = s.engine.available_slots(s.stylist, day).await.unwrap_err();
    assert_eq!(err, EngineError::StylistOnLeave { stylist_id: s.stylist, date: day });
    assert!(s.engine.has_leave(s.stylist, day));
    assert!(!s.engine.has_leave(s.stylist, date(2024, 6, 2)));
    // existing bookings are left alone
    assert_eq!(s.engine.list_pending_for_client(s.client).await.len(), 1);
}

#[tokio::test]
async fn duplicate_leave_is_rejected() {
    let s = salon("leave_dup.wal").await;
    let day = date(2024, 6, 1);
    let leave = s.engine.record_leave(s.stylist, day).await.unwrap();
    assert_eq!(leave.stylist_id, s.stylist);
    assert_eq!(
        s.engine.record_leave(s.stylist, day).await.unwrap_err(),
        EngineError::LeaveExists { stylist_id: s.stylist, date: day }
    );
}

#[tokio::test]
async fn leave_requires_a_stylist() {
    let s = salon("leave_role.wal").await;
    let day = date(2024, 6, 1);
    assert_eq!(
        s.engine.record_leave(s.client, day).await.unwrap_err(),
        EngineError::RoleMismatch { id: s.client, expected: Role::Stylist }
    );
    let ghost = ObjectId::new();
    assert_eq!(
        s.engine.record_leave(ghost, day).await.unwrap_err(),
        EngineError::NotFound { entity: "stylist", id: ghost }
    );
}

#[tokio::test]
async fn availability_for_unknown_stylist_is_not_found() {
    let s = salon("avail_unknown.wal").await;
    let err = s.engine.available_slots(s.client, date(2024, 6, 1)).await.unwrap_err();
    assert_eq!(err, EngineError::NotFound { entity: "stylist", id: s.client });
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.status_code(), 404);

    let admin = ObjectId::new();
    s.engine.register_user(admin, "Root".into(), Role::Admin).await.unwrap();
    let err = s.engine.available_slots(admin, date(2024, 6, 1)).await.unwrap_err();
    assert_eq!(err, EngineError::NotFound { entity: "stylist", id: admin });

    let ghost = ObjectId::new();
    let err = s.engine.available_slots(ghost, date(2024, 6, 1)).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn booking_validates_references() {
    let s = salon("book_refs.wal").await;
    let day = date(2024, 6, 1);

    let err = s.engine.create_appointment(s.stylist, s.stylist, day, 2).await.unwrap_err();
    assert_eq!(err, EngineError::RoleMismatch { id: s.stylist, expected: Role::Client });

    let ghost = ObjectId::new();
    let err = s.engine.create_appointment(ghost, s.stylist, day, 2).await.unwrap_err();
    assert_eq!(err, EngineError::NotFound { entity: "client", id: ghost });

    let err = s.engine.create_appointment(s.client, ghost, day, 2).await.unwrap_err();
    assert_eq!(err, EngineError::NotFound { entity: "stylist", id: ghost });

    let err = s.engine.create_appointment(s.client, s.stylist, day, 9).await.unwrap_err();
    assert_eq!(err, EngineError::InvalidSlot(9));

    assert!(s.engine.list_all_appointments().await.is_empty());
}

#[tokio::test]
async fn cancel_twice_reports_already_cancelled() {
    let s = salon("cancel_twice.wal").await;
    let day = date(2024, 6, 1);
    let appt = book(&s, day, 6).await;
    let id = appt.id.to_string();

    let cancelled = s.engine.cancel_appointment(&id).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert!(cancelled.updated_at >= appt.updated_at);

    let err = s.engine.cancel_appointment(&id).await.unwrap_err();
    assert_eq!(err.to_string(), "appointment already cancelled");
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn accept_then_accept_again() {
    let s = salon("accept_twice.wal").await;
    let appt = book(&s, date(2024, 6, 1), 2).await;
    let id = appt.id.to_string();

    let accepted = s.engine.accept_appointment(&id).await.unwrap();
    assert_eq!(accepted.status, AppointmentStatus::Accepted);
    assert!(matches!(
        s.engine.accept_appointment(&id).await,
        Err(EngineError::AlreadyInState { status: AppointmentStatus::Accepted, .. })
    ));
    assert_eq!(s.engine.list_approved_for_client(s.client).await, vec![accepted]);
}

#[tokio::test]
async fn cancelled_and_rejected_slots_become_free() {
    let s = salon("slot_freed.wal").await;
    let day = date(2024, 6, 1);
    let a = book(&s, day, 1).await;
    let b = book(&s, day, 2).await;

    s.engine.cancel_appointment(&a.id.to_string()).await.unwrap();
    s.engine.reject_appointment(&b.id.to_string()).await.unwrap();
    assert_eq!(
        s.engine.available_slots(s.stylist, day).await.unwrap(),
        vec![1, 2, 3, 4, 5, 6, 7, 8]
    );
    // and can be booked again
    let again = book(&s, day, 1).await;
    assert_ne!(again.id, a.id);
}

#[tokio::test]
async fn endless_book_cancel_cycles_keep_the_day_bookable() {
    let s = salon("book_cancel_cycles.wal").await;
    let day = date(2024, 6, 1);
    for _ in 0..300 {
        let a = book(&s, day, 1).await;
        s.engine.cancel_appointment(&a.id.to_string()).await.unwrap();
    }
    assert_eq!(
        s.engine.available_slots(s.stylist, day).await.unwrap(),
        vec![1, 2, 3, 4, 5, 6, 7, 8]
    );
    let last = book(&s, day, 1).await;
    assert_eq!(last.status, AppointmentStatus::Pending);
    assert_eq!(s.engine.list_all_appointments().await.len(), 301);
}

#[tokio::test]
async fn reactivation_cannot_double_book() {
    let s = salon("reactivate.wal").await;
    let day = date(2024, 6, 1);
    let first = book(&s, day, 4).await;
    s.engine.cancel_appointment(&first.id.to_string()).await.unwrap();
    book(&s, day, 4).await;

    let err = s.engine.accept_appointment(&first.id.to_string()).await.unwrap_err();
    assert!(matches!(err, EngineError::SlotTaken { slot: 4, .. }));
    let current = s.engine.get_appointment(&first.id.to_string()).await.unwrap();
    assert_eq!(current.status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn permissive_transition_out_of_terminal_state() {
    let s = salon("permissive.wal").await;
    let appt = book(&s, date(2024, 6, 1), 3).await;
    let id = appt.id.to_string();
    s.engine.reject_appointment(&id).await.unwrap();
    let revived = s.engine.accept_appointment(&id).await.unwrap();
    assert_eq!(revived.status, AppointmentStatus::Accepted);
}

#[tokio::test]
async fn transition_ids_are_validated() {
    let s = salon("bad_ids.wal").await;
    assert_eq!(
        s.engine.cancel_appointment("not-an-id").await.unwrap_err(),
        EngineError::InvalidId("not-an-id".into())
    );
    let unknown = ObjectId::new();
    let err = s.engine.accept_appointment(&unknown.to_string()).await.unwrap_err();
    assert_eq!(err, EngineError::NotFound { entity: "appointment", id: unknown });
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn client_listings_are_newest_first() {
    let s = salon("client_lists.wal").await;
    let a = book(&s, date(2024, 6, 1), 5).await;
    let b = book(&s, date(2024, 6, 3), 2).await;
    let c = book(&s, date(2024, 6, 3), 1).await;
    let d = book(&s, date(2024, 6, 2), 8).await;
    s.engine.accept_appointment(&d.id.to_string()).await.unwrap();

    let pending: Vec<ObjectId> = s
        .engine
        .list_pending_for_client(s.client)
        .await
        .iter()
        .map(|x| x.id)
        .collect();
    assert_eq!(pending, vec![c.id, b.id, a.id]);

    let approved = s.engine.list_approved_for_client(s.client).await;
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].id, d.id);

    assert!(s.engine.list_pending_for_client(ObjectId::new()).await.is_empty());
}

#[tokio::test]
async fn stylist_listings_are_oldest_first() {
    let s = salon("stylist_lists.wal").await;
    let a = book(&s, date(2030, 1, 2), 3).await;
    let b = book(&s, date(2030, 1, 1), 7).await;
    let c = book(&s, date(2030, 1, 1), 2).await;
    let past = book(&s, date(2020, 1, 1), 1).await;

    let requested: Vec<ObjectId> = s
        .engine
        .list_requested_for_stylist(s.stylist)
        .await
        .iter()
        .map(|x| x.id)
        .collect();
    assert_eq!(requested, vec![past.id, c.id, b.id, a.id]);

    for x in [&a, &b, &past] {
        s.engine.accept_appointment(&x.id.to_string()).await.unwrap();
    }
    let upcoming: Vec<ObjectId> = s
        .engine
        .list_upcoming_for_stylist(s.stylist, date(2025, 1, 1))
        .await
        .iter()
        .map(|x| x.id)
        .collect();
    assert_eq!(upcoming, vec![b.id, a.id]);

    // an appointment dated today still counts as upcoming
    let on_the_day = s
        .engine
        .list_upcoming_for_stylist(s.stylist, date(2030, 1, 2))
        .await;
    assert_eq!(on_the_day.len(), 1);
    assert_eq!(on_the_day[0].id, a.id);
}

#[tokio::test]
async fn list_all_orders_date_desc_slot_asc() {
    let s = salon("list_all.wal").await;
    book(&s, date(2024, 6, 1), 2).await;
    book(&s, date(2024, 6, 2), 8).await;
    book(&s, date(2024, 6, 2), 1).await;
    let order: Vec<(NaiveDate, u8)> = s
        .engine
        .list_all_appointments()
        .await
        .iter()
        .map(|a| (a.date, a.slot_number))
        .collect();
    assert_eq!(
        order,
        vec![(date(2024, 6, 2), 1), (date(2024, 6, 2), 8), (date(2024, 6, 1), 2)]
    );
}

#[tokio::test]
async fn available_stylists_skip_leave() {
    let s = salon("avail_stylists.wal").await;
    let other = ObjectId::new();
    s.engine.register_user(other, "Ada".into(), Role::Stylist).await.unwrap();
    let day = date(2024, 6, 1);
    s.engine.record_leave(s.stylist, day).await.unwrap();

    let free: Vec<ObjectId> = s.engine.available_stylists(day).iter().map(|u| u.id).collect();
    assert_eq!(free, vec![other]);
    assert_eq!(s.engine.leave_stylists(day), HashSet::from([s.stylist]));
    assert_eq!(s.engine.available_stylists(date(2024, 6, 2)).len(), 2);

    let names: Vec<String> = s.engine.list_stylists().into_iter().map(|u| u.name).collect();
    assert_eq!(names, vec!["Ada".to_string(), "Mara".to_string()]);
}

#[tokio::test]
async fn user_registration_rules() {
    let s = salon("users.wal").await;
    assert_eq!(
        s.engine.register_user(s.client, "Again".into(), Role::Client).await.unwrap_err(),
        EngineError::AlreadyExists(s.client)
    );
    let long = "x".repeat(MAX_NAME_LEN + 1);
    assert_eq!(
        s.engine.register_user(ObjectId::new(), long, Role::Client).await.unwrap_err(),
        EngineError::LimitExceeded("user name too long")
    );
    assert_eq!(s.engine.get_user(&s.stylist).unwrap().role, Role::Stylist);
}

// ── Service catalog ──────────────────────────────────────

#[tokio::test]
async fn service_create_get_and_list() {
    let s = salon("services_basic.wal").await;
    let fade = s.engine.create_service("Fade".into(), 30, 2500, None).await.unwrap();
    let color = s
        .engine
        .create_service("Color".into(), 90, 8000, Some("https://img.example/color.png".into()))
        .await
        .unwrap();

    assert_eq!(fade.duration, 30);
    assert_eq!(s.engine.get_service(&fade.id.to_string()).unwrap(), fade);
    let names: Vec<String> = s.engine.list_services().into_iter().map(|x| x.name).collect();
    assert_eq!(names, vec!["Color".to_string(), "Fade".to_string()]);
    assert_eq!(
        s.engine.get_service(&color.id.to_string()).unwrap().image_url.as_deref(),
        Some("https://img.example/color.png")
    );
}

#[tokio::test]
async fn service_names_are_unique() {
    let s = salon("services_unique.wal").await;
    s.engine.create_service("Fade".into(), 30, 2500, None).await.unwrap();
    let err = s.engine.create_service("Fade".into(), 45, 3000, None).await.unwrap_err();
    assert_eq!(err, EngineError::ServiceExists("Fade".into()));
    assert_eq!(err.status_code(), 400);
    assert_eq!(s.engine.list_services().len(), 1);
}

#[tokio::test]
async fn service_field_validation() {
    let s = salon("services_fields.wal").await;
    assert_eq!(
        s.engine.create_service("  ".into(), 30, 100, None).await.unwrap_err(),
        EngineError::InvalidService("name is empty")
    );
    assert_eq!(
        s.engine.create_service("Trim".into(), 0, 100, None).await.unwrap_err(),
        EngineError::InvalidService("duration out of range")
    );
    assert_eq!(
        s.engine
            .create_service("Trim".into(), i64::from(MAX_SERVICE_MINUTES) + 1, 100, None)
            .await
            .unwrap_err(),
        EngineError::InvalidService("duration out of range")
    );
    assert_eq!(
        s.engine.create_service("Trim".into(), 20, -1, None).await.unwrap_err(),
        EngineError::InvalidService("price is negative")
    );
    assert_ok!(s.engine.create_service("Trim".into(), 20, 0, None).await);
}

#[tokio::test]
async fn service_update_patches_fields() {
    let s = salon("services_update.wal").await;
    let fade = s
        .engine
        .create_service("Fade".into(), 30, 2500, Some("a.png".into()))
        .await
        .unwrap();
    let id = fade.id.to_string();

    let patch = ServicePatch {
        price: Some(2700),
        image_url: Some(None),
        ..Default::default()
    };
    let updated = s.engine.update_service(&id, patch).await.unwrap();
    assert_eq!(updated.name, "Fade");
    assert_eq!(updated.duration, 30);
    assert_eq!(updated.price, 2700);
    assert_eq!(updated.image_url, None);
    assert_eq!(s.engine.get_service(&id).unwrap(), updated);

    // keeping its own name is fine, taking another's is not
    let same_name = ServicePatch { name: Some("Fade".into()), ..Default::default() };
    assert_ok!(s.engine.update_service(&id, same_name).await);
    s.engine.create_service("Shave".into(), 15, 1200, None).await.unwrap();
    let clash = ServicePatch { name: Some("Shave".into()), ..Default::default() };
    assert_eq!(
        s.engine.update_service(&id, clash).await.unwrap_err(),
        EngineError::ServiceExists("Shave".into())
    );

    let bad = ServicePatch { duration: Some(-5), ..Default::default() };
    assert_err!(s.engine.update_service(&id, bad).await);
    assert_eq!(s.engine.get_service(&id).unwrap().price, 2700);
}

#[tokio::test]
async fn service_lookup_errors() {
    let s = salon("services_lookup.wal").await;
    let ghost = ObjectId::new();
    let raw = ghost.to_string();

    let err = s.engine.get_service(&raw).unwrap_err();
    assert_eq!(err, EngineError::NotFound { entity: "service", id: ghost });
    assert_eq!(err.to_string(), format!("service not found: {ghost}"));
    assert_eq!(
        s.engine.update_service(&raw, ServicePatch::default()).await.unwrap_err(),
        EngineError::NotFound { entity: "service", id: ghost }
    );
    assert_eq!(
        s.engine.delete_service(&raw).await.unwrap_err(),
        EngineError::NotFound { entity: "service", id: ghost }
    );
    assert_eq!(s.engine.get_service("abc").unwrap_err().kind(), ErrorKind::InvalidId);
    assert_eq!(
        s.engine.delete_service("abc").await.unwrap_err(),
        EngineError::InvalidId("abc".into())
    );
}

#[tokio::test]
async fn deleted_service_frees_its_name() {
    let s = salon("services_delete.wal").await;
    let fade = s.engine.create_service("Fade".into(), 30, 2500, None).await.unwrap();
    let id = fade.id.to_string();

    assert_eq!(s.engine.delete_service(&id).await.unwrap(), fade);
    assert!(s.engine.list_services().is_empty());
    assert_eq!(s.engine.get_service(&id).unwrap_err().status_code(), 404);
    assert_ok!(s.engine.create_service("Fade".into(), 35, 2600, None).await);
}

#[tokio::test]
async fn concurrent_creates_of_one_name_admit_exactly_one() {
    let s = Arc::new(salon("services_race.wal").await);
    let mut handles = Vec::new();
    for i in 0..8 {
        let s = s.clone();
        handles.push(tokio::spawn(async move {
            s.engine.create_service("Balayage".into(), 120, 15_000 + i, None).await
        }));
    }

    let mut created = 0;
    let mut exists = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => created += 1,
            Err(EngineError::ServiceExists(_)) => exists += 1,
            other => panic!("unexpected result: {other:?}"),
        }
    }
    assert_eq!((created, exists), (1, 7));
    assert_eq!(s.engine.list_services().len(), 1);
}

#[tokio::test]
async fn service_catalog_survives_restart_and_compaction() {
    let path = test_wal_path("services_restart.wal");
    let (kept, updated) = {
        let engine = Engine::new(path.clone()).unwrap();
        let kept = engine.create_service("Fade".into(), 30, 2500, None).await.unwrap();
        let gone = engine.create_service("Perm".into(), 120, 9000, None).await.unwrap();
        let color = engine.create_service("Color".into(), 90, 8000, None).await.unwrap();
        engine.delete_service(&gone.id.to_string()).await.unwrap();
        let patch = ServicePatch { duration: Some(75), ..Default::default() };
        let updated = engine.update_service(&color.id.to_string(), patch).await.unwrap();
        (kept, updated)
    };

    let engine = Engine::new(path.clone()).unwrap();
    assert_eq!(engine.list_services(), vec![updated.clone(), kept.clone()]);
    // two live services, nothing else
    assert_eq!(engine.compact_wal().await.unwrap(), 2);
    drop(engine);

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.list_services(), vec![updated, kept]);
}

#[tokio::test]
async fn concurrent_bookings_of_one_slot_admit_exactly_one() {
    let s = Arc::new(salon("race.wal").await);
    let day = date(2024, 6, 1);

    let mut clients = Vec::new();
    for i in 0..16 {
        let id = ObjectId::new();
        s.engine.register_user(id, format!("client {i}"), Role::Client).await.unwrap();
        clients.push(id);
    }

    let mut handles = Vec::new();
    for client in clients {
        let s = s.clone();
        handles.push(tokio::spawn(async move {
            s.engine.create_appointment(client, s.stylist, day, 7).await
        }));
    }

    let mut booked = 0;
    let mut taken = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(BookingOutcome::Booked(_)) => booked += 1,
            Err(EngineError::SlotTaken { .. }) => taken += 1,
            other => panic!("unexpected result: {other:?}"),
        }
    }
    assert_eq!(booked, 1);
    assert_eq!(taken, 15);
    assert_eq!(s.engine.available_slots(s.stylist, day).await.unwrap().len(), 7);
}

#[tokio::test]
async fn concurrent_cancels_succeed_once() {
    let s = Arc::new(salon("cancel_race.wal").await);
    let appt = book(&s, date(2024, 6, 1), 1).await;
    let id = appt.id.to_string();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let s = s.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move { s.engine.cancel_appointment(&id).await }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::AlreadyInState { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
}

#[tokio::test]
async fn settlement_moves_past_appointments() {
    let s = salon("settle.wal").await;
    let past_pending = book(&s, date(2024, 5, 30), 1).await;
    let past_accepted = book(&s, date(2024, 5, 31), 2).await;
    let past_cancelled = book(&s, date(2024, 5, 31), 3).await;
    let future = book(&s, date(2024, 6, 2), 4).await;
    s.engine.accept_appointment(&past_accepted.id.to_string()).await.unwrap();
    s.engine.cancel_appointment(&past_cancelled.id.to_string()).await.unwrap();

    let today = date(2024, 6, 1);
    let mut unsettled = s.engine.collect_unsettled(today);
    unsettled.sort();
    let mut expected = vec![past_pending.id, past_accepted.id];
    expected.sort();
    assert_eq!(unsettled, expected);

    for id in unsettled {
        assert!(s.engine.settle_appointment(id, today).await.unwrap().is_some());
    }
    let status = |a: &Appointment| {
        let id = a.id.to_string();
        let engine = &s.engine;
        async move { engine.get_appointment(&id).await.unwrap().status }
    };
    assert_eq!(status(&past_pending).await, AppointmentStatus::Expired);
    assert_eq!(status(&past_accepted).await, AppointmentStatus::Completed);
    assert_eq!(status(&past_cancelled).await, AppointmentStatus::Cancelled);
    assert_eq!(status(&future).await, AppointmentStatus::Pending);

    assert!(s.engine.collect_unsettled(today).is_empty());
    // settling a future appointment is a no-op
    assert_eq!(s.engine.settle_appointment(future.id, today).await.unwrap(), None);
}

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let stylist = ObjectId::new();
    let client = ObjectId::new();
    let day = date(2024, 6, 1);
    let (booked, cancelled) = {
        let engine = Engine::new(path.clone()).unwrap();
        engine.register_user(stylist, "Mara".into(), Role::Stylist).await.unwrap();
        engine.register_user(client, "Jo".into(), Role::Client).await.unwrap();
        engine.record_leave(stylist, date(2024, 6, 2)).await.unwrap();
        let booked = match engine.create_appointment(client, stylist, day, 3).await.unwrap() {
            BookingOutcome::Booked(a) => a,
            other => panic!("{other:?}"),
        };
        let second = match engine.create_appointment(client, stylist, day, 4).await.unwrap() {
            BookingOutcome::Booked(a) => a,
            other => panic!("{other:?}"),
        };
        let cancelled = engine.cancel_appointment(&second.id.to_string()).await.unwrap();
        (booked, cancelled)
    };

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.get_user(&client).unwrap().name, "Jo");
    assert!(engine.has_leave(stylist, date(2024, 6, 2)));
    assert_eq!(engine.get_appointment(&booked.id.to_string()).await.unwrap(), booked);
    assert_eq!(engine.get_appointment(&cancelled.id.to_string()).await.unwrap(), cancelled);
    assert_eq!(
        engine.available_slots(stylist, day).await.unwrap(),
        vec![1, 2, 4, 5, 6, 7, 8]
    );
    // the uniqueness guard holds after replay too
    assert!(matches!(
        engine.create_appointment(client, stylist, day, 3).await,
        Err(EngineError::SlotTaken { .. })
    ));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    let stylist = ObjectId::new();
    let client = ObjectId::new();
    let day = date(2024, 6, 1);
    let kept = {
        let engine = Engine::new(path.clone()).unwrap();
        engine.register_user(stylist, "Mara".into(), Role::Stylist).await.unwrap();
        engine.register_user(client, "Jo".into(), Role::Client).await.unwrap();
        // churn: book and cancel the same slot repeatedly
        for _ in 0..10 {
            let a = match engine.create_appointment(client, stylist, day, 1).await.unwrap() {
                BookingOutcome::Booked(a) => a,
                other => panic!("{other:?}"),
            };
            engine.cancel_appointment(&a.id.to_string()).await.unwrap();
        }
        let kept = match engine.create_appointment(client, stylist, day, 1).await.unwrap() {
            BookingOutcome::Booked(a) => a,
            other => panic!("{other:?}"),
        };
        let kept = engine.accept_appointment(&kept.id.to_string()).await.unwrap();

        assert_eq!(engine.wal_appends_since_compact().await, 2 + 20 + 2);
        let before = std::fs::metadata(&path).unwrap().len();
        // 2 users + 11 appointments, statuses folded in
        assert_eq!(engine.compact_wal().await.unwrap(), 13);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert!(std::fs::metadata(&path).unwrap().len() < before);
        kept
    };

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.get_appointment(&kept.id.to_string()).await.unwrap(), kept);
    assert_eq!(engine.list_all_appointments().await.len(), 11);
    assert_eq!(engine.list_approved_for_client(client).await, vec![kept]);
}
