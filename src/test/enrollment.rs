#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rocket::tokio;

    use crate::auth::Role;
    use crate::db::{authenticate_user, find_user_by_username, get_student, list_sections};
    use crate::enrollment::identifiers::GENERATED_PASSWORD_LEN;
    use crate::enrollment::{
        EnrollmentStage, StudentApplication, compensate_login, enroll_student, school_year_for,
    };
    use crate::error::AppError;
    use crate::test::test_utils::{TEST_SCHOOL_YEAR, TestDb, TestDbBuilder, test_config};

    fn enrollment_day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()
    }

    fn application(first: &str, last: &str, grade_level: i64) -> StudentApplication {
        StudentApplication {
            first_name: first.to_string(),
            last_name: last.to_string(),
            grade_level,
            ..StudentApplication::default()
        }
    }

    async fn empty_db() -> TestDb {
        TestDbBuilder::new()
            .build()
            .await
            .expect("Failed to build test database")
    }

    #[test]
    fn test_school_year_rolls_over_in_june() {
        let may = NaiveDate::from_ymd_opt(2026, 5, 31).unwrap();
        let june = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();

        assert_eq!(school_year_for(may, 6), "2025-2026");
        assert_eq!(school_year_for(june, 6), "2026-2027");
    }

    #[tokio::test]
    async fn test_enroll_juan_dela_cruz() {
        let test_db = empty_db().await;

        let receipt = enroll_student(
            test_db.login(),
            test_db.student(),
            &test_config(),
            &application("Juan", "Dela Cruz", 1),
            enrollment_day(),
        )
        .await
        .expect("Enrollment should succeed");

        assert_eq!(receipt.email, "juan.delacruz@sanagustines.edu.ph");
        assert_eq!(receipt.username, "jdelacruz");
        assert_eq!(receipt.student_id, "ST-2026-0001");
        assert_eq!(receipt.school_year, TEST_SCHOOL_YEAR);
        assert_eq!(receipt.section.as_deref(), Some("S1"));
        assert!(receipt.section_assigned);
        assert_eq!(receipt.name, "Juan Dela Cruz");

        let password = receipt
            .temporary_password
            .clone()
            .expect("A password should have been generated");
        assert_eq!(password.chars().count(), GENERATED_PASSWORD_LEN);

        let user = authenticate_user(test_db.login(), "jdelacruz", &password)
            .await
            .unwrap()
            .expect("Generated password should log in");
        assert_eq!(user.role, Role::Student);
        assert_eq!(user.id, receipt.user_id);

        let student = get_student(test_db.student(), "ST-2026-0001").await.unwrap();
        assert_eq!(student.user_id, receipt.user_id);
        assert_eq!(student.status, "Pending");
        assert_eq!(student.section.as_deref(), Some("S1"));

        let enrollment_status = sqlx::query_scalar::<_, String>(
            "SELECT status FROM enrollments WHERE student_id = 'ST-2026-0001'",
        )
        .fetch_one(test_db.student())
        .await
        .unwrap();
        assert_eq!(enrollment_status, "Pending");
    }

    #[tokio::test]
    async fn test_supplied_password_is_not_echoed() {
        let test_db = empty_db().await;
        let mut app = application("Maria", "Santos", 2);
        app.password = Some("secret123".to_string());
        app.confirm_password = Some("secret123".to_string());

        let receipt = enroll_student(
            test_db.login(),
            test_db.student(),
            &test_config(),
            &app,
            enrollment_day(),
        )
        .await
        .unwrap();

        assert!(receipt.temporary_password.is_none());
        assert!(
            authenticate_user(test_db.login(), &receipt.username, "secret123")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_password_mismatch_writes_nothing() {
        let test_db = empty_db().await;
        let mut app = application("Juan", "Dela Cruz", 1);
        app.password = Some("secret123".to_string());
        app.confirm_password = Some("secret999".to_string());

        let err = enroll_student(
            test_db.login(),
            test_db.student(),
            &test_config(),
            &app,
            enrollment_day(),
        )
        .await
        .expect_err("Mismatched passwords must fail");

        assert_eq!(err.stage, EnrollmentStage::Received);
        match err.source {
            AppError::Validation(msg) => assert_eq!(msg, "Passwords do not match"),
            other => panic!("Expected validation error, got {:?}", other),
        }

        assert_eq!(test_db.user_count().await, 0);
        assert_eq!(test_db.student_count().await, 0);
        assert_eq!(test_db.count(test_db.student(), "sections").await, 0);
    }

    #[tokio::test]
    async fn test_student_ids_are_sequential() {
        let test_db = empty_db().await;
        let config = test_config();

        let mut ids = Vec::new();
        for (first, last) in [("Ana", "Reyes"), ("Ben", "Reyes"), ("Carla", "Reyes")] {
            let receipt = enroll_student(
                test_db.login(),
                test_db.student(),
                &config,
                &application(first, last, 3),
                enrollment_day(),
            )
            .await
            .unwrap();
            ids.push(receipt.student_id);
        }

        assert_eq!(ids, vec!["ST-2026-0001", "ST-2026-0002", "ST-2026-0003"]);
    }

    #[tokio::test]
    async fn test_student_id_sequence_is_numeric() {
        let test_db = TestDbBuilder::new()
            .enrolled("ST-2026-9999", "Old", "Timer", 6, None, TEST_SCHOOL_YEAR)
            .enrolled("ST-2025-0500", "Last", "Year", 6, None, "2025-2026")
            .build()
            .await
            .unwrap();

        let receipt = enroll_student(
            test_db.login(),
            test_db.student(),
            &test_config(),
            &application("New", "Comer", 6),
            enrollment_day(),
        )
        .await
        .unwrap();
        assert_eq!(receipt.student_id, "ST-2026-10000");

        let receipt = enroll_student(
            test_db.login(),
            test_db.student(),
            &test_config(),
            &application("Next", "Comer", 6),
            enrollment_day(),
        )
        .await
        .unwrap();
        assert_eq!(receipt.student_id, "ST-2026-10001");
    }

    #[tokio::test]
    async fn test_name_collisions_get_suffixes() {
        let test_db = empty_db().await;
        let config = test_config();

        let first = enroll_student(
            test_db.login(),
            test_db.student(),
            &config,
            &application("Juan", "Dela Cruz", 1),
            enrollment_day(),
        )
        .await
        .unwrap();
        let second = enroll_student(
            test_db.login(),
            test_db.student(),
            &config,
            &application("José", "Dela Cruz", 1),
            enrollment_day(),
        )
        .await
        .unwrap();

        assert_eq!(first.username, "jdelacruz");
        assert_eq!(second.username, "jdelacruz1");
        assert_eq!(first.email, "juan.delacruz@sanagustines.edu.ph");
        assert_eq!(second.email, "jose.delacruz@sanagustines.edu.ph");

        let third = enroll_student(
            test_db.login(),
            test_db.student(),
            &config,
            &application("Juan", "Dela Cruz", 2),
            enrollment_day(),
        )
        .await
        .unwrap();
        assert_eq!(third.username, "jdelacruz2");
        assert_eq!(third.email, "juan.delacruz1@sanagustines.edu.ph");
    }

    #[tokio::test]
    async fn test_thirty_first_student_opens_next_section() {
        let test_db = TestDbBuilder::new()
            .section(1, "S1", TEST_SCHOOL_YEAR)
            .fill_section(1, "S1", TEST_SCHOOL_YEAR, 30, 2026)
            .build()
            .await
            .unwrap();

        let receipt = enroll_student(
            test_db.login(),
            test_db.student(),
            &test_config(),
            &application("Juan", "Dela Cruz", 1),
            enrollment_day(),
        )
        .await
        .unwrap();

        assert_eq!(receipt.section.as_deref(), Some("S2"));
        assert!(receipt.section_assigned);
        assert_eq!(receipt.student_id, "ST-2026-0031");

        let sections = list_sections(test_db.student(), Some(1), Some(TEST_SCHOOL_YEAR))
            .await
            .unwrap();
        let occupancy: Vec<(String, i64)> = sections
            .into_iter()
            .map(|s| (s.name, s.current_students))
            .collect();
        assert_eq!(
            occupancy,
            vec![("S1".to_string(), 30), ("S2".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_duplicate_username_is_rejected() {
        let test_db = TestDbBuilder::new()
            .student_user("taken")
            .build()
            .await
            .unwrap();
        let mut app = application("Juan", "Dela Cruz", 1);
        app.username = Some("taken".to_string());

        let err = enroll_student(
            test_db.login(),
            test_db.student(),
            &test_config(),
            &app,
            enrollment_day(),
        )
        .await
        .expect_err("Duplicate username must fail");

        match err.source {
            AppError::Conflict(msg) => assert_eq!(msg, "Username already exists"),
            other => panic!("Expected conflict, got {:?}", other),
        }
        assert_eq!(test_db.user_count().await, 1);
        assert_eq!(test_db.student_count().await, 0);
    }

    #[tokio::test]
    async fn test_lrn_conflict_rolls_back_both_stores() {
        let test_db = empty_db().await;
        let config = test_config();

        let mut first = application("Ana", "Lopez", 4);
        first.lrn = Some("123456789012".to_string());
        enroll_student(
            test_db.login(),
            test_db.student(),
            &config,
            &first,
            enrollment_day(),
        )
        .await
        .unwrap();

        let mut second = application("Bea", "Lopez", 4);
        second.lrn = Some("123456789012".to_string());
        let err = enroll_student(
            test_db.login(),
            test_db.student(),
            &config,
            &second,
            enrollment_day(),
        )
        .await
        .expect_err("Duplicate LRN must fail");

        assert!(matches!(err.source, AppError::Conflict(_)));
        assert_eq!(test_db.user_count().await, 1);
        assert_eq!(test_db.student_count().await, 1);
        assert!(
            find_user_by_username(test_db.login(), "blopez")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_student_insert_failure_rolls_back_login() {
        let test_db = empty_db().await;

        sqlx::query(
            "CREATE TRIGGER reject_students BEFORE INSERT ON students
             BEGIN SELECT RAISE(ABORT, 'students are locked'); END",
        )
        .execute(test_db.student())
        .await
        .unwrap();

        let err = enroll_student(
            test_db.login(),
            test_db.student(),
            &test_config(),
            &application("Juan", "Dela Cruz", 1),
            enrollment_day(),
        )
        .await
        .expect_err("Student insert must fail");

        assert_eq!(err.stage, EnrollmentStage::SectionResolved);
        assert!(matches!(err.source, AppError::Database(_)));
        assert_eq!(err.source.public_message(), "Database error occurred");
        assert_eq!(test_db.user_count().await, 0);
        assert_eq!(test_db.count(test_db.student(), "sections").await, 0);
    }

    #[tokio::test]
    async fn test_compensation_removes_login_account() {
        let test_db = TestDbBuilder::new()
            .student_user("orphan")
            .build()
            .await
            .unwrap();
        let user_id = test_db.user_id("orphan").unwrap();

        compensate_login(test_db.login(), user_id).await;

        assert_eq!(test_db.user_count().await, 0);
    }
}
