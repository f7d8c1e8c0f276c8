diesel::table! {
    learn_courses (id) {
        id -> Int4,
        title -> Text,
    }
}

diesel::table! {
    learn_chapters (id) {
        id -> Int4,
        course_id -> Int4,
        title -> Text,
        sort_index -> Int4,
    }
}

diesel::table! {
    learn_parts (id) {
        id -> Int4,
        chapter_id -> Int4,
        title -> Text,
        description -> Text,
        sort_index -> Int4,
    }
}

diesel::table! {
    learn_quizzes (id) {
        id -> Int4,
        part_id -> Int4,
        title -> Nullable<Text>,
    }
}

diesel::table! {
    learn_questions (id) {
        id -> Int4,
        quiz_id -> Int4,
        question_text -> Text,
        sort_index -> Int4,
    }
}

diesel::table! {
    learn_answers (id) {
        id -> Int4,
        question_id -> Int4,
        answer_text -> Text,
        is_correct -> Bool,
        sort_index -> Int4,
    }
}

diesel::table! {
    learn_content_progress (id) {
        id -> Int4,
        user_id -> Int4,
        part_id -> Int4,
        completed -> Bool,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    learn_quiz_scores (id) {
        id -> Int4,
        user_id -> Int4,
        course_id -> Int4,
        part_id -> Int4,
        quiz_id -> Int4,
        payload -> Jsonb,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    learn_attempt_tracks (id) {
        id -> Int4,
        user_id -> Int4,
        course_id -> Int4,
        part_id -> Int4,
        attempt_count -> Int4,
        window_closed_time -> Nullable<Timestamptz>,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    learn_resume_pointers (id) {
        id -> Int4,
        user_id -> Int4,
        course_id -> Int4,
        part_id -> Int4,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    learn_certificates (id) {
        id -> Int4,
        user_id -> Int4,
        course_id -> Int4,
        code -> Text,
        grade -> Text,
        issued_at -> Timestamptz,
    }
}

diesel::joinable!(learn_chapters -> learn_courses (course_id));
diesel::joinable!(learn_parts -> learn_chapters (chapter_id));
diesel::joinable!(learn_quizzes -> learn_parts (part_id));
diesel::joinable!(learn_questions -> learn_quizzes (quiz_id));
diesel::joinable!(learn_answers -> learn_questions (question_id));

diesel::allow_tables_to_appear_in_same_query!(
    learn_courses,
    learn_chapters,
    learn_parts,
    learn_quizzes,
    learn_questions,
    learn_answers,
    learn_content_progress,
    learn_quiz_scores,
    learn_attempt_tracks,
    learn_resume_pointers,
    learn_certificates,
);
