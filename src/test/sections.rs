#[cfg(test)]
mod tests {
    use rocket::tokio;

    use crate::db::{find_open_section, list_sections, set_section_status};
    use crate::enrollment::sections::{
        SectionPlacement, assign_section, next_section_label, section_number,
    };
    use crate::models::SectionStatus;
    use crate::test::test_utils::{TEST_SCHOOL_YEAR, TestDbBuilder};

    #[test]
    fn test_next_section_label() {
        let none: [&str; 0] = [];
        assert_eq!(next_section_label(&none), "S1");
        assert_eq!(next_section_label(&["S1"]), "S2");
        assert_eq!(next_section_label(&["S1", "S9", "S10"]), "S11");
        assert_eq!(next_section_label(&["Rizal", "S3"]), "S4");
        assert_eq!(next_section_label(&["Rizal"]), "S1");
    }

    #[test]
    fn test_section_number() {
        assert_eq!(section_number("S12"), Some(12));
        assert_eq!(section_number(" S3 "), Some(3));
        assert_eq!(section_number("s2"), None);
        assert_eq!(section_number("Sampaguita"), None);
        assert_eq!(next_section_label(&["s7", "S2"]), "S3");
    }

    #[tokio::test]
    async fn test_prefers_least_occupied_section() {
        let test_db = TestDbBuilder::new()
            .section(1, "S1", TEST_SCHOOL_YEAR)
            .section(1, "S2", TEST_SCHOOL_YEAR)
            .fill_section(1, "S1", TEST_SCHOOL_YEAR, 3, 2026)
            .fill_section(1, "S2", TEST_SCHOOL_YEAR, 1, 2026)
            .build()
            .await
            .expect("Failed to build test database");

        let mut conn = test_db.student().acquire().await.unwrap();
        let placement = assign_section(&mut conn, 1, TEST_SCHOOL_YEAR, 30)
            .await
            .unwrap();

        assert_eq!(placement, SectionPlacement::Existing("S2".to_string()));
    }

    #[tokio::test]
    async fn test_ties_go_to_oldest_section() {
        let test_db = TestDbBuilder::new()
            .section(2, "S1", TEST_SCHOOL_YEAR)
            .section(2, "S2", TEST_SCHOOL_YEAR)
            .build()
            .await
            .expect("Failed to build test database");

        let mut conn = test_db.student().acquire().await.unwrap();
        let section = find_open_section(&mut conn, 2, TEST_SCHOOL_YEAR, 30)
            .await
            .unwrap()
            .expect("An empty section should be open");

        assert_eq!(section.name, "S1");
        assert_eq!(section.current_students, 0);
    }

    #[tokio::test]
    async fn test_full_sections_open_a_new_one() {
        let test_db = TestDbBuilder::new()
            .section(1, "S1", TEST_SCHOOL_YEAR)
            .fill_section(1, "S1", TEST_SCHOOL_YEAR, 2, 2026)
            .build()
            .await
            .expect("Failed to build test database");

        let mut conn = test_db.student().acquire().await.unwrap();
        let placement = assign_section(&mut conn, 1, TEST_SCHOOL_YEAR, 2)
            .await
            .unwrap();
        drop(conn);

        assert_eq!(placement, SectionPlacement::Created("S2".to_string()));

        let sections = list_sections(test_db.student(), Some(1), Some(TEST_SCHOOL_YEAR))
            .await
            .unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].name, "S2");
        assert_eq!(sections[1].status, "active");
    }

    #[tokio::test]
    async fn test_inactive_sections_are_skipped() {
        let test_db = TestDbBuilder::new()
            .section(3, "S1", TEST_SCHOOL_YEAR)
            .build()
            .await
            .expect("Failed to build test database");

        let sections = list_sections(test_db.student(), Some(3), None).await.unwrap();
        set_section_status(test_db.student(), sections[0].id, SectionStatus::Inactive)
            .await
            .unwrap();

        let mut conn = test_db.student().acquire().await.unwrap();
        let placement = assign_section(&mut conn, 3, TEST_SCHOOL_YEAR, 30)
            .await
            .unwrap();

        // The inactive S1 still reserves its label.
        assert_eq!(placement, SectionPlacement::Created("S2".to_string()));
    }

    #[tokio::test]
    async fn test_failed_section_insert_leaves_student_unassigned() {
        let test_db = TestDbBuilder::new()
            .build()
            .await
            .expect("Failed to build test database");

        let mut conn = test_db.student().acquire().await.unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_sections BEFORE INSERT ON sections
             BEGIN SELECT RAISE(ABORT, 'sections are locked'); END",
        )
        .execute(&mut *conn)
        .await
        .unwrap();

        let placement = assign_section(&mut conn, 4, TEST_SCHOOL_YEAR, 30)
            .await
            .unwrap();

        assert_eq!(placement, SectionPlacement::Unassigned);
        assert!(!placement.is_assigned());
        assert_eq!(placement.name(), None);
    }
}
