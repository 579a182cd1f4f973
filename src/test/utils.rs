#[cfg(test)]
pub mod test_utils {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Once;

    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};
    use tracing::log::LevelFilter;

    use crate::api::LoginResponse;
    use crate::auth::Role;
    use crate::config::RegistrarConfig;
    use crate::db::{
        NewAccount, NewStudent, Stores, create_user, insert_section, insert_student, insert_user,
        upsert_enrollment,
    };
    use crate::error::AppError;
    use crate::models::EnrollmentStatus;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";
    pub const TEST_BCRYPT_COST: u32 = 4;
    pub const TEST_SCHOOL_YEAR: &str = "2026-2027";

    pub fn test_config() -> RegistrarConfig {
        RegistrarConfig {
            bcrypt_cost: TEST_BCRYPT_COST,
            ..RegistrarConfig::default()
        }
    }

    /// Fresh directory under the system temp dir for file-backed stores.
    pub fn temp_dir(prefix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    /// A single-connection in-memory database. The pool never recycles its
    /// connection so the data lives as long as the pool.
    pub async fn memory_pool() -> Result<Pool<Sqlite>, sqlx::Error> {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        sections: Vec<TestSection>,
        students: Vec<TestStudent>,
    }

    pub struct TestUser {
        pub username: String,
        pub role: Role,
        pub password: String,
    }

    pub struct TestSection {
        pub grade_level: i64,
        pub name: String,
        pub school_year: String,
    }

    pub struct TestStudent {
        pub student_id: String,
        pub first_name: String,
        pub last_name: String,
        pub grade_level: i64,
        pub section: Option<String>,
        pub school_year: String,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn registrar(self, username: &str) -> Self {
            self.user_with_password(username, Role::Registrar, STANDARD_PASSWORD)
        }

        pub fn teacher(self, username: &str) -> Self {
            self.user_with_password(username, Role::Teacher, STANDARD_PASSWORD)
        }

        pub fn student_user(self, username: &str) -> Self {
            self.user_with_password(username, Role::Student, STANDARD_PASSWORD)
        }

        pub fn user_with_password(mut self, username: &str, role: Role, password: &str) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                role,
                password: password.to_string(),
            });
            self
        }

        pub fn section(mut self, grade_level: i64, name: &str, school_year: &str) -> Self {
            self.sections.push(TestSection {
                grade_level,
                name: name.to_string(),
                school_year: school_year.to_string(),
            });
            self
        }

        /// An already enrolled student, with a placeholder login account.
        pub fn enrolled(
            mut self,
            student_id: &str,
            first_name: &str,
            last_name: &str,
            grade_level: i64,
            section: Option<&str>,
            school_year: &str,
        ) -> Self {
            self.students.push(TestStudent {
                student_id: student_id.to_string(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                grade_level,
                section: section.map(String::from),
                school_year: school_year.to_string(),
            });
            self
        }

        /// `count` students named `Filler<n> Student` in one section.
        pub fn fill_section(
            mut self,
            grade_level: i64,
            section: &str,
            school_year: &str,
            count: usize,
            id_year: i32,
        ) -> Self {
            let offset = self.students.len();
            for n in 1..=count {
                let seq = offset + n;
                self = self.enrolled(
                    &format!("ST-{id_year}-{seq:04}"),
                    &format!("Filler{seq}"),
                    "Student",
                    grade_level,
                    Some(section),
                    school_year,
                );
            }
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .filter_level(LevelFilter::Debug)
                    .is_test(true)
                    .try_init();
            });

            let stores = Stores {
                login: memory_pool().await?,
                student: memory_pool().await?,
            };
            stores.migrate().await?;

            let mut user_id_map = HashMap::new();

            for user in &self.users {
                let user_id = create_user(
                    &stores.login,
                    &user.username,
                    &format!("{}@staff.test", user.username),
                    &user.password,
                    user.role,
                    &user.username,
                    TEST_BCRYPT_COST,
                )
                .await?;

                user_id_map.insert(user.username.clone(), user_id);
            }

            let mut login = stores.login.acquire().await?;
            let mut student = stores.student.acquire().await?;

            for section in &self.sections {
                insert_section(
                    &mut student,
                    section.grade_level,
                    &section.name,
                    &section.school_year,
                )
                .await?;
            }

            for record in &self.students {
                let username = record.student_id.to_lowercase();
                let user_id = insert_user(
                    &mut login,
                    &NewAccount {
                        username: username.clone(),
                        email: format!("{username}@seed.test"),
                        password_hash: "not-a-hash".to_string(),
                        role: Role::Student,
                        display_name: format!("{} {}", record.first_name, record.last_name),
                    },
                )
                .await?;

                insert_student(
                    &mut student,
                    &NewStudent {
                        student_id: &record.student_id,
                        user_id,
                        lrn: None,
                        first_name: &record.first_name,
                        middle_name: None,
                        last_name: &record.last_name,
                        suffix: None,
                        birthdate: None,
                        gender: None,
                        address: None,
                        grade_level: record.grade_level,
                        section: record.section.as_deref(),
                        guardian_name: None,
                        guardian_contact: None,
                        status: EnrollmentStatus::Pending,
                        school_year: &record.school_year,
                    },
                )
                .await?;

                upsert_enrollment(
                    &mut student,
                    &record.student_id,
                    record.grade_level,
                    record.section.as_deref(),
                    &record.school_year,
                    EnrollmentStatus::Pending,
                )
                .await?;
            }

            drop(login);
            drop(student);

            Ok(TestDb {
                stores,
                user_id_map,
            })
        }
    }

    pub struct TestDb {
        pub stores: Stores,
        pub user_id_map: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn login(&self) -> &Pool<Sqlite> {
            &self.stores.login
        }

        pub fn student(&self) -> &Pool<Sqlite> {
            &self.stores.student
        }

        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }

        pub async fn count(&self, pool: &Pool<Sqlite>, table: &str) -> i64 {
            sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(pool)
                .await
                .expect("Failed to count rows")
        }

        pub async fn user_count(&self) -> i64 {
            self.count(self.login(), "users").await
        }

        pub async fn student_count(&self) -> i64 {
            self.count(self.student(), "students").await
        }
    }

    /// Registrar, teacher and student accounts and one grade 1 section.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .registrar("registrar_user")
            .teacher("teacher_user")
            .student_user("student_user")
            .section(1, "S1", TEST_SCHOOL_YEAR)
            .build()
            .await
            .expect("Failed to build standard test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let figment = rocket::Config::figment()
            .merge(("bcrypt_cost", TEST_BCRYPT_COST))
            .merge(("enrollment_form_url", "/registrar/enroll"))
            .merge(("roster_url", "/registrar/students"));

        let rocket = crate::mount_registrar(rocket::custom(figment), test_db.stores.clone());
        let client = Client::tracked(rocket)
            .await
            .expect("Failed to build rocket client");

        (client, test_db)
    }

    /// Logs in through the API. The tracked client keeps the session cookie.
    pub async fn login_test_user(client: &Client, username: &str, password: &str) {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(json!({ "username": username, "password": password }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        let body: LoginResponse = response
            .into_json()
            .await
            .expect("Login response was not JSON");
        assert!(body.success, "Login failed for {}", username);
    }
}
